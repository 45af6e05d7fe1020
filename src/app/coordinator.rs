//! Runs one long operation off the caller's thread.
//!
//! A [`Coordinator`] serves two kinds of consumers: an event loop that calls
//! [`Coordinator::poll`] between frames, and a blocking caller that awaits
//! [`Coordinator::wait`]. Progress and the terminal result travel through the
//! same bounded channel, so a result is never observed before the progress
//! emitted ahead of it. When the consumer falls behind, progress is coalesced
//! to the latest event instead of queueing without limit.

use std::sync::{Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::{CoreError, Progress, ProgressSink};

/// A long-running, progress-emitting unit of work.
pub trait Operation: Send + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Runs to completion on a blocking thread. Implementations check
    /// `cancel` regularly and return [`CoreError::Cancelled`] once it fires.
    fn run(
        &self,
        input: Self::Input,
        cancel: &CancellationToken,
        progress: &dyn ProgressSink,
    ) -> Result<Self::Output, CoreError>;
}

/// Lifecycle of a coordinator. Terminal states never change again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    NotStarted,
    Running,
    Done,
    Failed,
    Canceled,
}

/// What a single [`Coordinator::poll`] call observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvent {
    Progress(Progress),
    /// Running, nothing new since the last poll.
    Idle,
    Done,
    Failed,
    Canceled,
}

enum Event<T> {
    Progress(Progress),
    Finished(Result<T, CoreError>),
}

/// Events buffered between the operation and its consumer.
const EVENT_QUEUE_CAPACITY: usize = 64;

struct ChannelSink<T> {
    tx: Sender<Event<T>>,
    /// Latest progress that did not fit into the queue.
    pending: Mutex<Option<Progress>>,
}

impl<T: Send> ChannelSink<T> {
    fn new(tx: Sender<Event<T>>) -> Self {
        Self {
            tx,
            pending: Mutex::new(None),
        }
    }

    /// Delivers the held-back progress and then the result, waiting for
    /// queue space. Returns early once the consumer is gone.
    fn finish(self, result: Result<T, CoreError>) {
        let pending = self
            .pending
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(progress) = pending {
            if self.tx.blocking_send(Event::Progress(progress)).is_err() {
                return;
            }
        }
        let _ = self.tx.blocking_send(Event::Finished(result));
    }
}

impl<T: Send> ProgressSink for ChannelSink<T> {
    fn report(&self, progress: Progress) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(held) = pending.take() {
            match self.tx.try_send(Event::Progress(held)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    *pending = Some(progress);
                    return;
                }
                // A consumer that stopped listening is not the operation's problem.
                Err(TrySendError::Closed(_)) => return,
            }
        }
        if let Err(TrySendError::Full(_)) = self.tx.try_send(Event::Progress(progress)) {
            *pending = Some(progress);
        }
    }
}

enum State<T> {
    NotStarted,
    Running(Receiver<Event<T>>),
    Done(Option<T>),
    Failed(Option<CoreError>),
    Canceled,
}

/// Single-use driver for one [`Operation`].
pub struct Coordinator<O: Operation> {
    handle: Handle,
    cancel: CancellationToken,
    state: State<O::Output>,
    task: Option<JoinHandle<()>>,
}

impl<O: Operation> Coordinator<O> {
    /// `handle` is the runtime whose blocking pool runs the operation.
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            cancel: CancellationToken::new(),
            state: State::NotStarted,
            task: None,
        }
    }

    /// Launches `operation` and returns immediately.
    pub fn start(&mut self, operation: O, input: O::Input) -> Result<(), CoreError> {
        if !matches!(self.state, State::NotStarted) {
            return Err(CoreError::AlreadyStarted);
        }

        let (tx, rx) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        let cancel = self.cancel.clone();
        let task = self.handle.spawn_blocking(move || {
            let sink = ChannelSink::new(tx);
            let result = operation.run(input, &cancel, &sink);
            sink.finish(result);
        });

        tracing::debug!("Operation started");
        self.task = Some(task);
        self.state = State::Running(rx);
        Ok(())
    }

    /// Requests cooperative cancellation. Has no effect once terminal.
    pub fn cancel(&self) {
        if matches!(self.state, State::NotStarted | State::Running(_)) {
            tracing::debug!("Cancellation requested");
            self.cancel.cancel();
        }
    }

    /// A handle on this coordinator's cancellation signal, for callers that
    /// cancel from elsewhere, e.g. a signal handler or a deadline.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn status(&self) -> Status {
        match self.state {
            State::NotStarted => Status::NotStarted,
            State::Running(_) => Status::Running,
            State::Done(_) => Status::Done,
            State::Failed(_) => Status::Failed,
            State::Canceled => Status::Canceled,
        }
    }

    /// Returns the next buffered event without blocking. Once terminal, every
    /// further call reports the same terminal event.
    pub fn poll(&mut self) -> Result<PollEvent, CoreError> {
        let received = match &mut self.state {
            State::NotStarted => return Err(CoreError::NotStarted),
            State::Running(rx) => rx.try_recv(),
            State::Done(_) => return Ok(PollEvent::Done),
            State::Failed(_) => return Ok(PollEvent::Failed),
            State::Canceled => return Ok(PollEvent::Canceled),
        };

        match received {
            Ok(Event::Progress(progress)) => Ok(PollEvent::Progress(progress)),
            Ok(Event::Finished(result)) => Ok(self.finish(result)),
            Err(TryRecvError::Empty) => Ok(PollEvent::Idle),
            Err(TryRecvError::Disconnected) => Ok(self.finish(Err(CoreError::Disconnected))),
        }
    }

    /// Drives the operation to completion, handing every progress event to
    /// `on_progress`, and returns the result.
    pub async fn wait(
        &mut self,
        mut on_progress: impl FnMut(Progress),
    ) -> Result<O::Output, CoreError> {
        loop {
            let event = match &mut self.state {
                State::NotStarted => return Err(CoreError::NotStarted),
                State::Running(rx) => Some(rx.recv().await),
                _ => None,
            };
            let Some(event) = event else {
                return self.result();
            };

            match event {
                Some(Event::Progress(progress)) => on_progress(progress),
                Some(Event::Finished(result)) => {
                    self.finish(result);
                    return self.result();
                }
                None => {
                    let error = match self.task.take() {
                        Some(task) => match task.await {
                            Err(join_error) => CoreError::Join(join_error),
                            Ok(()) => CoreError::Disconnected,
                        },
                        None => CoreError::Disconnected,
                    };
                    self.finish(Err(error));
                    return self.result();
                }
            }
        }
    }

    /// Takes the terminal value. The first call after completion yields the
    /// operation's outcome; later calls return [`CoreError::ResultConsumed`],
    /// except after cancellation, which keeps reporting
    /// [`CoreError::Cancelled`].
    pub fn result(&mut self) -> Result<O::Output, CoreError> {
        match &mut self.state {
            State::NotStarted => Err(CoreError::NotStarted),
            State::Running(_) => Err(CoreError::NotFinished),
            State::Done(value) => value.take().ok_or(CoreError::ResultConsumed),
            State::Failed(error) => Err(error.take().unwrap_or(CoreError::ResultConsumed)),
            State::Canceled => Err(CoreError::Cancelled),
        }
    }

    fn finish(&mut self, result: Result<O::Output, CoreError>) -> PollEvent {
        self.task = None;
        let (state, event) = match result {
            Ok(value) => (State::Done(Some(value)), PollEvent::Done),
            Err(e) if e.is_cancelled() => (State::Canceled, PollEvent::Canceled),
            Err(e) => {
                tracing::debug!("Operation failed: {}", e);
                (State::Failed(Some(e)), PollEvent::Failed)
            }
        };
        self.state = state;
        event
    }
}

impl<O: Operation> Drop for Coordinator<O> {
    fn drop(&mut self) {
        if matches!(self.state, State::Running(_)) {
            self.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Stage;
    use std::time::Duration;

    /// Emits `n` progress events, then returns `n`.
    struct Steps(u64);

    impl Operation for Steps {
        type Input = ();
        type Output = u64;

        fn run(&self, _: (), _: &CancellationToken, progress: &dyn ProgressSink) -> Result<u64, CoreError> {
            for i in 1..=self.0 {
                progress.report(Progress::new(Stage::Collecting, i, self.0));
            }
            Ok(self.0)
        }
    }

    struct Failing;

    impl Operation for Failing {
        type Input = usize;
        type Output = ();

        fn run(&self, attempted: usize, _: &CancellationToken, _: &dyn ProgressSink) -> Result<(), CoreError> {
            Err(CoreError::Exhausted { attempted })
        }
    }

    /// Runs until cancelled.
    struct Spin;

    impl Operation for Spin {
        type Input = ();
        type Output = ();

        fn run(&self, _: (), cancel: &CancellationToken, _: &dyn ProgressSink) -> Result<(), CoreError> {
            while !cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(1));
            }
            Err(CoreError::Cancelled)
        }
    }

    async fn poll_to_end<O: Operation>(coordinator: &mut Coordinator<O>) -> (Vec<Progress>, PollEvent) {
        let mut seen = Vec::new();
        loop {
            match coordinator.poll().unwrap() {
                PollEvent::Progress(p) => seen.push(p),
                PollEvent::Idle => tokio::time::sleep(Duration::from_millis(1)).await,
                terminal => return (seen, terminal),
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_not_started() {
        let mut coordinator = Coordinator::<Steps>::new(Handle::current());
        assert_eq!(coordinator.status(), Status::NotStarted);
        assert!(matches!(coordinator.poll(), Err(CoreError::NotStarted)));
        assert!(matches!(coordinator.result(), Err(CoreError::NotStarted)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_single_use() {
        let mut coordinator = Coordinator::new(Handle::current());
        coordinator.start(Steps(1), ()).unwrap();
        assert!(matches!(
            coordinator.start(Steps(1), ()),
            Err(CoreError::AlreadyStarted)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_progress_arrives_before_result() {
        let mut coordinator = Coordinator::new(Handle::current());
        coordinator.start(Steps(200), ()).unwrap();

        let (seen, terminal) = poll_to_end(&mut coordinator).await;
        assert_eq!(terminal, PollEvent::Done);
        assert!(seen.windows(2).all(|w| w[0].current < w[1].current));
        assert_eq!(seen.last().map(|p| p.current), Some(200));

        assert_eq!(coordinator.poll().unwrap(), PollEvent::Done);
        assert_eq!(coordinator.result().unwrap(), 200);
        assert!(matches!(coordinator.result(), Err(CoreError::ResultConsumed)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_idle_consumer_keeps_queue_bounded() {
        let mut coordinator = Coordinator::new(Handle::current());
        coordinator.start(Steps(10_000), ()).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let (seen, terminal) = poll_to_end(&mut coordinator).await;
        assert_eq!(terminal, PollEvent::Done);
        assert!(seen.len() <= EVENT_QUEUE_CAPACITY + 1);
        assert!(seen.windows(2).all(|w| w[0].current < w[1].current));
        assert_eq!(seen.last().map(|p| p.current), Some(10_000));
        assert_eq!(coordinator.result().unwrap(), 10_000);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failure_is_reported_once() {
        let mut coordinator = Coordinator::new(Handle::current());
        coordinator.start(Failing, 3).unwrap();

        let (_, terminal) = poll_to_end(&mut coordinator).await;
        assert_eq!(terminal, PollEvent::Failed);
        assert!(matches!(coordinator.result(), Err(CoreError::Exhausted { attempted: 3 })));
        assert!(matches!(coordinator.result(), Err(CoreError::ResultConsumed)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cancel_stops_operation() {
        let mut coordinator = Coordinator::new(Handle::current());
        coordinator.start(Spin, ()).unwrap();
        assert!(matches!(coordinator.result(), Err(CoreError::NotFinished)));

        coordinator.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), coordinator.wait(|_| {}))
            .await
            .expect("operation did not stop after cancel");
        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(coordinator.status(), Status::Canceled);
        assert_eq!(coordinator.poll().unwrap(), PollEvent::Canceled);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_wait_forwards_progress() {
        let mut coordinator = Coordinator::new(Handle::current());
        coordinator.start(Steps(5), ()).unwrap();

        let mut seen = Vec::new();
        let value = coordinator.wait(|p| seen.push(p.current)).await.unwrap();
        assert_eq!(value, 5);
        assert_eq!(seen, vec![1, 2, 3, 4, 5]);
        assert_eq!(coordinator.status(), Status::Done);
    }
}
