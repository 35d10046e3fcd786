use std::sync::Arc;
use std::time::Duration;

use crate::core::Envelope;
use crate::core::Handler;
use crate::core::HandlerError;
use crate::core::HandlerOutcome;

/// Runs the handler under a hard wall-clock deadline.
///
/// The call is spawned as a separate local task and aborted once the deadline
/// passes, so a timed-out handler stops at its next await point. Handler code
/// must yield for the deadline to be enforceable; a long non-async section
/// cannot be interrupted. Panics inside the handler are captured and reported
/// as raises.
///
/// Handler futures are not required to be `Send`; callers must run within a
/// tokio `LocalSet`.
pub async fn run_handler<H: Handler>(handler: &Arc<H>, envelope: &Envelope, timeout_secs: u64) -> HandlerOutcome {
    let handler = handler.clone();
    let envelope = envelope.clone();
    let mut child = tokio::task::spawn_local(async move { handler.call(&envelope).await });

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(timeout_secs)) => {
            child.abort();
            let _ = (&mut child).await;
            HandlerOutcome::TimedOut { after_secs: timeout_secs }
        }
        join_result = &mut child => match join_result {
            Ok(Ok(())) => HandlerOutcome::Completed,
            Ok(Err(error)) => HandlerOutcome::Raised(error),
            Err(join_error) if join_error.is_panic() => {
                HandlerOutcome::Raised(HandlerError::Panic(panic_text(join_error.into_panic())))
            }
            Err(_) => HandlerOutcome::Raised(HandlerError::Message("handler task was cancelled".to_owned())),
        }
    }
}

fn panic_text(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        return (*text).to_owned();
    }
    if let Some(text) = payload.downcast_ref::<String>() {
        return text.clone();
    }

    "opaque panic payload".to_owned()
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use crate::core::Envelope;
    use crate::core::Handler;
    use crate::core::HandlerError;
    use crate::core::HandlerOutcome;
    use crate::invoker::run_handler;

    async fn with_local_set<F: Future>(future: F) -> F::Output {
        tokio::task::LocalSet::new().run_until(future).await
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Behavior {
        Succeed,
        Raise,
        Hang,
        Panic,
    }

    #[derive(Debug)]
    struct ScriptedHandler {
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl ScriptedHandler {
        fn new(behavior: Behavior) -> Arc<Self> { Arc::new(Self { behavior, calls: AtomicUsize::new(0) }) }
    }

    impl Handler for ScriptedHandler {
        async fn call(&self, _envelope: &Envelope) -> Result<(), HandlerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Succeed => Ok(()),
                Behavior::Raise => Err(HandlerError::Message("boom".to_owned())),
                Behavior::Hang => std::future::pending().await,
                Behavior::Panic => panic!("handler blew up"),
            }
        }
    }

    #[tokio::test]
    async fn completed_handler_reports_completion() {
        let handler = ScriptedHandler::new(Behavior::Succeed);
        let outcome = with_local_set(run_handler(&handler, &Envelope::default(), 10)).await;

        assert_eq!(HandlerOutcome::Completed, outcome);
        assert_eq!(1, handler.calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn raising_handler_reports_the_error() {
        let handler = ScriptedHandler::new(Behavior::Raise);
        let outcome = with_local_set(run_handler(&handler, &Envelope::default(), 10)).await;

        assert_eq!(HandlerOutcome::Raised(HandlerError::Message("boom".to_owned())), outcome);
    }

    #[tokio::test]
    async fn hanging_handler_is_aborted_at_the_deadline() {
        let handler = ScriptedHandler::new(Behavior::Hang);
        let outcome = with_local_set(run_handler(&handler, &Envelope::default(), 0)).await;

        assert_eq!(HandlerOutcome::TimedOut { after_secs: 0 }, outcome);
    }

    #[tokio::test]
    async fn panicking_handler_is_captured() {
        let handler = ScriptedHandler::new(Behavior::Panic);
        let outcome = with_local_set(run_handler(&handler, &Envelope::default(), 10)).await;

        assert_eq!(HandlerOutcome::Raised(HandlerError::Panic("handler blew up".to_owned())), outcome);
    }
}
