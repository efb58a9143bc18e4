//! Scheduler that drives the VM from two clocks.
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, error, info};

use crate::{
    clock::Clock,
    constants::CLOCK_CYCLE_TIME,
    error::Chip8Result,
    keyboard::KeyCode,
    vm::{Chip8Vm, EmulatorState},
};

/// Runs a [`Chip8Vm`] in real time.
///
/// While playing, one thread executes instructions at the configured CPU
/// frequency and another ticks the timers at 60Hz. Each step holds the VM
/// lock for exactly one cycle or one tick, so input and inspection from
/// the host interleave between steps.
pub struct Runner {
    vm: Arc<Mutex<Chip8Vm>>,
    running: Arc<AtomicBool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Runner {
    pub fn new(vm: Chip8Vm) -> Self {
        Self {
            vm: Arc::new(Mutex::new(vm)),
            running: Arc::new(AtomicBool::new(false)),
            tasks: Vec::new(),
        }
    }

    /// Shared handle to the VM, for inspection by the host.
    pub fn vm(&self) -> Arc<Mutex<Chip8Vm>> {
        self.vm.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Stop the clocks and load a new program.
    pub fn load(&mut self, bytecode: &[u8]) -> Chip8Result<()> {
        self.suspend();
        lock(&self.vm).load_bytecode(bytecode)
    }

    pub fn state(&self) -> EmulatorState {
        lock(&self.vm).state()
    }

    pub fn key_down(&self, key: KeyCode) {
        lock(&self.vm).key_down(key)
    }

    pub fn key_up(&self, key: KeyCode) {
        lock(&self.vm).key_up(key)
    }

    /// Start both clocks. Does nothing when they are already running.
    ///
    /// When the CPU task stopped on an error, both tasks are restarted.
    pub fn resume(&mut self) {
        if self.tasks.iter().any(|task| task.is_finished()) {
            self.suspend();
        }

        if self.is_running() {
            return;
        }

        let cpu_interval = {
            let mut vm = lock(&self.vm);
            vm.resume();
            vm.config().cpu_interval()
        };
        self.running.store(true, Ordering::SeqCst);

        self.spawn("chip8-cpu", cpu_interval, |vm| {
            // The program is stopped on error, and was already reported to the devices.
            vm.run_cycle().is_ok()
        });
        let timer_interval = Duration::from_nanos(CLOCK_CYCLE_TIME);
        self.spawn("chip8-timer", timer_interval, |vm| {
            vm.tick_timers();
            true
        });
    }

    /// Stop both clocks and wait for their threads to finish.
    pub fn suspend(&mut self) {
        if !self.is_running() {
            return;
        }

        self.running.store(false, Ordering::SeqCst);
        for task in self.tasks.drain(..) {
            let name = task.thread().name().unwrap_or_default().to_string();
            if task.join().is_err() {
                error!("{name} task panicked");
            }
        }

        lock(&self.vm).suspend();
    }

    /// Spawn a task that calls `step` once per clock cycle, until the
    /// runner is suspended or the step returns `false`.
    fn spawn<F>(&mut self, name: &str, interval: Duration, mut step: F)
    where
        F: FnMut(&mut Chip8Vm) -> bool + Send + 'static,
    {
        let vm = self.vm.clone();
        let running = self.running.clone();
        let task_name = name.to_string();

        let spawned = thread::Builder::new()
            .name(task_name.clone())
            .spawn(move || {
                debug!("{task_name} task started");
                let mut clock = Clock::new(interval);

                while running.load(Ordering::SeqCst) {
                    let keep_going = match vm.lock() {
                        Ok(mut vm) => step(&mut *vm),
                        Err(_) => {
                            error!("{task_name} task found the VM lock poisoned");
                            false
                        }
                    };

                    if !keep_going {
                        break;
                    }

                    clock.wait();
                }

                debug!("{task_name} task stopped");
            });

        match spawned {
            Ok(handle) => self.tasks.push(handle),
            Err(err) => error!("failed to spawn {name} task: {err}"),
        }
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        if self.is_running() {
            info!("stopping runner");
        }
        self.suspend();
    }
}

/// A panicked step leaves the VM in a consistent state between
/// instructions, so the poison flag is ignored.
fn lock(vm: &Mutex<Chip8Vm>) -> MutexGuard<'_, Chip8Vm> {
    vm.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
