use std::any::Any;
use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::mpsc;

use crate::error::ServiceError;

type UiJob = Box<dyn FnOnce() + Send>;

/// Sending half of the UI work queue. Cloned freely across host worker
/// threads; every clone feeds the same single consumer.
#[derive(Clone)]
pub struct UiDispatcher {
    sender: mpsc::Sender<UiJob>,
}

/// Receiving half, owned by the application's UI thread.
pub struct UiWorkQueue {
    receiver: mpsc::Receiver<UiJob>,
}

impl UiDispatcher {
    pub fn channel() -> (UiDispatcher, UiWorkQueue) {
        let (sender, receiver) = mpsc::channel();
        (UiDispatcher { sender }, UiWorkQueue { receiver })
    }

    /// Runs `f` on the UI thread and blocks until it completes.
    ///
    /// There is no timeout: a wedged UI thread hangs the caller with it. A
    /// panic inside `f` is caught on the UI thread and comes back as a
    /// dispatch failure instead of unwinding the application's event loop.
    pub fn run<T, F>(&self, f: F) -> Result<T, ServiceError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (done_tx, done_rx) = mpsc::channel();
        let job: UiJob = Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(f));
            let _ = done_tx.send(outcome);
        });

        self.sender
            .send(job)
            .map_err(|_| ServiceError::Dispatch("ui work queue is gone".to_string()))?;

        match done_rx.recv() {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(payload)) => Err(ServiceError::Dispatch(format!(
                "panicked on the ui thread: {}",
                panic_text(payload.as_ref())
            ))),
            Err(_) => Err(ServiceError::Dispatch(
                "ui thread dropped the job".to_string(),
            )),
        }
    }
}

impl UiWorkQueue {
    /// Services jobs until every dispatcher handle is dropped. For a
    /// dedicated thread when the application has no event loop of its own.
    pub fn run(self) {
        while let Ok(job) = self.receiver.recv() {
            job();
        }
    }

    /// Runs everything currently queued without blocking; returns false
    /// once all dispatchers are gone and the queue is drained. Applications
    /// with their own event loop call this once per frame.
    pub fn pump(&self) -> bool {
        loop {
            match self.receiver.try_recv() {
                Ok(job) => job(),
                Err(mpsc::TryRecvError::Empty) => return true,
                Err(mpsc::TryRecvError::Disconnected) => return false,
            }
        }
    }
}

pub(crate) fn panic_text(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_jobs_run_on_the_queue_thread() {
        let (dispatcher, queue) = UiDispatcher::channel();
        let ui_thread = std::thread::spawn(move || {
            let ui_thread_id = std::thread::current().id();
            queue.run();
            ui_thread_id
        });

        let observed = dispatcher.run(|| std::thread::current().id()).unwrap();
        let caller = std::thread::current().id();
        assert_ne!(observed, caller);

        drop(dispatcher);
        let ui_thread_id = ui_thread.join().unwrap();
        assert_eq!(observed, ui_thread_id);
    }

    #[test]
    fn test_results_come_back_in_call_order() {
        let (dispatcher, queue) = UiDispatcher::channel();
        let ui_thread = std::thread::spawn(move || queue.run());

        let mut total = 0;
        for i in 0..10 {
            total += dispatcher.run(move || i * 2).unwrap();
        }
        assert_eq!(total, 90);

        drop(dispatcher);
        ui_thread.join().unwrap();
    }

    #[test]
    fn test_panic_is_contained_and_reported() {
        let (dispatcher, queue) = UiDispatcher::channel();
        let ui_thread = std::thread::spawn(move || queue.run());

        let err = dispatcher
            .run(|| -> u32 { panic!("widget tree corrupted") })
            .unwrap_err();
        assert!(
            err.to_string().contains("widget tree corrupted"),
            "unexpected error: {err}"
        );

        // The queue must survive the panic and keep servicing jobs.
        assert_eq!(dispatcher.run(|| 11).unwrap(), 11);

        drop(dispatcher);
        ui_thread.join().unwrap();
    }

    #[test]
    fn test_dropped_queue_fails_without_hanging() {
        let (dispatcher, queue) = UiDispatcher::channel();
        drop(queue);

        let err = dispatcher.run(|| 1).unwrap_err();
        assert!(err.to_string().contains("work queue is gone"));
    }

    #[test]
    fn test_pump_services_jobs_from_a_frame_loop() {
        let (dispatcher, queue) = UiDispatcher::channel();
        let worker = std::thread::spawn(move || dispatcher.run(|| 7));

        while !worker.is_finished() {
            queue.pump();
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(worker.join().unwrap().unwrap(), 7);

        // All dispatchers are gone, so the queue reports closed.
        assert!(!queue.pump());
    }
}
