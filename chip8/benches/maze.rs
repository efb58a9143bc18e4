use criterion::{black_box, criterion_group, criterion_main, Criterion};

use chip8::prelude::*;

/// Draws an endless maze of random diagonal lines.
fn maze() -> Vec<u8> {
    use Instruction as I;

    let v = |index| Reg::new(index).unwrap();
    let addr = |address| Addr::new(address).unwrap();
    let four = Nibble::new(4).unwrap();

    let mut bytecode = assemble(&[
        I::LoadAddress {
            address: addr(0x21E),
        },
        I::Random { vx: v(2), kk: 1 },
        I::SkipEqByte { vx: v(2), kk: 1 },
        I::LoadAddress {
            address: addr(0x21A),
        },
        I::Draw {
            vx: v(0),
            vy: v(1),
            n: four,
        },
        I::AddByte { vx: v(0), kk: 4 },
        I::SkipEqByte { vx: v(0), kk: 64 },
        I::Jump {
            address: addr(0x200),
        },
        I::LoadByte { vx: v(0), kk: 0 },
        I::AddByte { vx: v(1), kk: 4 },
        I::SkipEqByte { vx: v(1), kk: 32 },
        I::Jump {
            address: addr(0x200),
        },
        I::Jump {
            address: addr(0x218),
        },
    ]);
    // Line sprites
    bytecode.extend_from_slice(&[0x80, 0x40, 0x20, 0x10, 0x20, 0x40, 0x80, 0x10]);
    bytecode
}

fn criterion_benchmark(c: &mut Criterion) {
    {
        let mut vm = Chip8Vm::new(Chip8Conf::default());
        vm.load_bytecode(&maze()).unwrap();

        c.bench_function("maze bytecode", |b| {
            b.iter(|| {
                let step_count = black_box(1000_usize);
                black_box(vm.run_steps(step_count))
            })
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
