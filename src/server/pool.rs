//! A fixed set of single-threaded reactors.
//!
//! Each reactor is a current-thread tokio runtime parked on its own OS
//! thread. Accepted connections are handed out round-robin, and everything
//! a connection does afterwards stays on the reactor that received it.

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tracing::{debug, warn};

struct Reactor {
    handle: Handle,
    stop: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

pub struct ReactorPool {
    reactors: Vec<Reactor>,
    next: AtomicUsize,
}

impl ReactorPool {
    /// Starts `size` reactors. A size of zero is rejected.
    pub fn new(size: usize) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "reactor pool size must be at least 1",
            ));
        }

        let mut reactors = Vec::with_capacity(size);
        for id in 0..size {
            let runtime = Builder::new_current_thread().enable_all().build()?;
            let handle = runtime.handle().clone();
            let (stop_tx, stop_rx) = oneshot::channel::<()>();

            let thread = std::thread::Builder::new()
                .name(format!("reactor-{id}"))
                .spawn(move || {
                    runtime.block_on(async {
                        let _ = stop_rx.await;
                    });
                    debug!(reactor = id, "reactor stopped");
                })?;

            reactors.push(Reactor {
                handle,
                stop: Some(stop_tx),
                thread: Some(thread),
            });
        }

        Ok(Self {
            reactors,
            next: AtomicUsize::new(0),
        })
    }

    pub fn size(&self) -> usize {
        self.reactors.len()
    }

    /// The next reactor in round-robin order.
    pub fn next_handle(&self) -> &Handle {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.reactors.len();
        &self.reactors[index].handle
    }

    /// Runs `task` on the next reactor.
    pub fn spawn<F>(&self, task: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.next_handle().spawn(task)
    }

    /// Signals every reactor to stop and waits for their threads. Tasks
    /// still running are dropped, closing their sockets.
    pub fn stop(&mut self) {
        for reactor in &mut self.reactors {
            if let Some(stop) = reactor.stop.take() {
                let _ = stop.send(());
            }
        }
        for reactor in &mut self.reactors {
            if let Some(thread) = reactor.thread.take() {
                if thread.join().is_err() {
                    warn!("reactor thread panicked");
                }
            }
        }
    }
}

impl Drop for ReactorPool {
    fn drop(&mut self) {
        self.stop();
    }
}
