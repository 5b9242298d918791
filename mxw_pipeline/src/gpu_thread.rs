//! The dedicated thread that submits GPU work to the host.
//!
//! Commands execute in push order on a single thread owning the rendering context.
//! Each command gets a fence value one greater than the previous command.
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use log::{error, trace};

use crate::workers::{BlockingQueue, StopToken};

/// A list of command buffer entries fetched by the GPU.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommandList {
    pub entries: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    SubmitList(CommandList),
    /// Present the framebuffer at the given GPU address.
    SwapBuffers { framebuffer: Option<u64> },
    FlushRegion { address: u64, size: u64 },
    InvalidateRegion { address: u64, size: u64 },
    FlushAndInvalidateRegion { address: u64, size: u64 },
    /// Periodic work like releasing resources of finished frames.
    Tick,
}

/// Executes commands on the GPU thread.
pub trait CommandExecutor: Send + 'static {
    fn execute(&mut self, command: Command);
}

struct CommandData {
    command: Command,
    fence: u64,
    /// The caller is waiting for this command to finish.
    block: bool,
}

struct SyncState {
    queue: BlockingQueue<CommandData>,
    push_order: Mutex<()>,
    last_fence: AtomicU64,
    signaled_fence: AtomicU64,
    signaled: Mutex<()>,
    signaled_changed: Condvar,
}

impl SyncState {
    fn signal(&self, fence: u64, block: bool) {
        self.signaled_fence.store(fence, Ordering::Release);
        if block {
            let _lock = self.signaled.lock().unwrap();
            self.signaled_changed.notify_all();
        }
    }

    fn wait_for_fence(&self, fence: u64) {
        let mut lock = self.signaled.lock().unwrap();
        while self.signaled_fence.load(Ordering::Acquire) < fence {
            lock = self.signaled_changed.wait(lock).unwrap();
        }
    }
}

/// Owns the GPU thread and the queue of commands for it.
pub struct ThreadManager {
    state: Arc<SyncState>,
    stop: StopToken,
    thread: Option<JoinHandle<()>>,
    /// Let flushes and invalidations complete asynchronously.
    is_async: bool,
}

impl ThreadManager {
    /// Start the GPU thread running commands on `executor`.
    pub fn start<E: CommandExecutor>(mut executor: E, is_async: bool) -> std::io::Result<Self> {
        let state = Arc::new(SyncState {
            queue: BlockingQueue::new(),
            push_order: Mutex::new(()),
            last_fence: AtomicU64::new(0),
            signaled_fence: AtomicU64::new(0),
            signaled: Mutex::new(()),
            signaled_changed: Condvar::new(),
        });
        let stop = StopToken::new();

        let thread = {
            let state = state.clone();
            let stop = stop.clone();
            std::thread::Builder::new()
                .name("GPU".to_string())
                .spawn(move || {
                    while let Some(data) = state.queue.pop_wait(&stop) {
                        trace!("Executing command {}", data.fence);
                        executor.execute(data.command);
                        state.signal(data.fence, data.block);
                    }
                })?
        };

        Ok(Self {
            state,
            stop,
            thread: Some(thread),
            is_async,
        })
    }

    pub fn submit_list(&self, list: CommandList) {
        self.push_command(Command::SubmitList(list), false);
    }

    pub fn swap_buffers(&self, framebuffer: Option<u64>) {
        self.push_command(Command::SwapBuffers { framebuffer }, false);
    }

    /// Write cached GPU data for the region back to guest memory.
    /// Synchronous managers block until the flush completes.
    pub fn flush_region(&self, address: u64, size: u64) {
        let block = !self.is_async;
        self.push_command(Command::FlushRegion { address, size }, block);
    }

    pub fn invalidate_region(&self, address: u64, size: u64) {
        self.push_command(Command::InvalidateRegion { address, size }, false);
    }

    pub fn flush_and_invalidate_region(&self, address: u64, size: u64) {
        let block = !self.is_async;
        self.push_command(Command::FlushAndInvalidateRegion { address, size }, block);
    }

    pub fn tick_gpu(&self) {
        self.push_command(Command::Tick, false);
    }

    /// Spin until every pushed command has executed.
    pub fn wait_idle(&self) {
        let last = self.state.last_fence.load(Ordering::Acquire);
        while self.state.signaled_fence.load(Ordering::Acquire) < last {
            std::hint::spin_loop();
        }
    }

    /// The fence of the most recently pushed command.
    pub fn last_fence(&self) -> u64 {
        self.state.last_fence.load(Ordering::Acquire)
    }

    /// The fence of the most recently executed command.
    pub fn signaled_fence(&self) -> u64 {
        self.state.signaled_fence.load(Ordering::Acquire)
    }

    /// Queue `command` and return its fence.
    /// If `block` is set, this waits for the command to finish executing.
    pub fn push_command(&self, command: Command, block: bool) -> u64 {
        // Fence values increase in queue order.
        let fence = {
            let _lock = self.state.push_order.lock().unwrap();
            let fence = self.state.last_fence.fetch_add(1, Ordering::AcqRel) + 1;
            self.state.queue.push(CommandData {
                command,
                fence,
                block,
            });
            fence
        };
        if block {
            self.state.wait_for_fence(fence);
        }
        fence
    }
}

impl Drop for ThreadManager {
    fn drop(&mut self) {
        self.stop.request_stop();
        self.state.queue.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("GPU thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Clone, Default)]
    struct Recorder {
        commands: Arc<Mutex<Vec<Command>>>,
    }

    impl CommandExecutor for Recorder {
        fn execute(&mut self, command: Command) {
            self.commands.lock().unwrap().push(command);
        }
    }

    #[test]
    fn commands_run_in_push_order() {
        let recorder = Recorder::default();
        let manager = ThreadManager::start(recorder.clone(), true).unwrap();

        let a = manager.push_command(Command::Tick, false);
        manager.submit_list(CommandList {
            entries: vec![1, 2, 3],
        });
        manager.invalidate_region(0x1000, 0x100);
        manager.swap_buffers(Some(0x2000));
        manager.wait_idle();

        assert_eq!(1, a);
        assert_eq!(4, manager.last_fence());
        assert_eq!(4, manager.signaled_fence());
        assert_eq!(
            vec![
                Command::Tick,
                Command::SubmitList(CommandList {
                    entries: vec![1, 2, 3]
                }),
                Command::InvalidateRegion {
                    address: 0x1000,
                    size: 0x100
                },
                Command::SwapBuffers {
                    framebuffer: Some(0x2000)
                },
            ],
            *recorder.commands.lock().unwrap()
        );
    }

    #[test]
    fn synchronous_flush_blocks() {
        let recorder = Recorder::default();
        let manager = ThreadManager::start(recorder.clone(), false).unwrap();
        manager.tick_gpu();
        manager.flush_region(0x1000, 0x20);

        // The flush and every command before it already executed.
        assert_eq!(2, recorder.commands.lock().unwrap().len());
        assert_eq!(2, manager.signaled_fence());
    }

    #[test]
    fn stop_with_idle_thread() {
        let manager = ThreadManager::start(Recorder::default(), true).unwrap();
        manager.wait_idle();
        drop(manager);
    }
}
