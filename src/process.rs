use std::sync::Arc;

use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::core::Clock;
use crate::core::Delivery;
use crate::core::Handler;
use crate::core::HandlerPolicy;
use crate::core::ResultCode;
use crate::core::Store;
use crate::invoker;
use crate::message::Message;
use crate::store::MsgId;
use crate::store::Subkey;

pub const STATUS_INCOMPLETE: &str = "incomplete";
pub const STATUS_COMPLETED: &str = "completed";

#[derive(Debug)]
pub enum ProcessError<SE, DE> {
    Store(SE),
    Ack(DE),
}

impl<SE: std::fmt::Display, DE: std::fmt::Display> std::fmt::Display for ProcessError<SE, DE> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(error) => write!(f, "store operation failed: {error}"),
            Self::Ack(error) => write!(f, "broker ack failed: {error}"),
        }
    }
}

impl<SE, DE> std::error::Error for ProcessError<SE, DE>
where
    SE: std::error::Error,
    DE: std::error::Error,
{
}

/// Everything one `process` call needs besides the message and the handler:
/// the shared coordination store and the clock. Passed explicitly instead of
/// living in process-wide globals so tests can inject both.
#[derive(Debug, Clone)]
pub struct ProcessingContext<S, C> {
    store: S,
    clock: C,
}

impl<S, C> ProcessingContext<S, C>
where
    S: Store,
    C: Clock,
{
    pub fn new(store: S, clock: C) -> Self { Self { store, clock } }

    pub fn store(&self) -> &S { &self.store }

    pub fn clock(&self) -> &C { &self.clock }

    /// Decides, from the envelope and the store state, whether to run the
    /// handler now, ack and discard, defer, or reject. Never fails: internal
    /// errors are logged and reported as `ResultCode::InternalError`.
    ///
    /// Must run within a tokio `LocalSet` (see [`invoker::run_handler`]).
    pub async fn process<D, H>(&self, message: &mut Message<D>, handler: &Arc<H>) -> ResultCode
    where
        D: Delivery,
        H: Handler,
    {
        let internal = self.process_internal(message, handler).await;
        let result = match internal {
            Ok(result) => result,
            Err(process_error) => {
                error!(msg_id = %message.msg_id(), error = %process_error, "unexpected error during processing");
                return ResultCode::InternalError;
            }
        };

        if let Some(exception) = message.exception() {
            if let Err(callback_error) = handler.on_exception(message.envelope(), exception).await {
                error!(msg_id = %message.msg_id(), error = %callback_error, "exception callback failed");
                return ResultCode::InternalError;
            }
        }

        if result.failure() {
            if let Err(callback_error) = handler.on_failure(message.envelope(), result).await {
                error!(msg_id = %message.msg_id(), error = %callback_error, "failure callback failed");
                return ResultCode::InternalError;
            }
        }

        result
    }

    async fn process_internal<D, H>(
        &self, message: &mut Message<D>, handler: &Arc<H>,
    ) -> Result<ResultCode, ProcessError<S::Error, D::Error>>
    where
        D: Delivery,
        H: Handler,
    {
        if let Some(decode_error) = message.decode_error() {
            warn!(msg_id = %message.msg_id(), error = %decode_error, "acking undecodable message");
            self.ack(message).await?;
            return Ok(ResultCode::DecodingError);
        }

        let now = self.clock.now();
        if message.expired(now) {
            warn!(msg_id = %message.msg_id(), "ignored expired message");
            self.ack(message).await?;
            return Ok(ResultCode::Ancient);
        }

        // at-most-once by caller request: ack first, run after, no store access
        if message.simple() {
            self.ack(message).await?;
            let timeout_secs = message.policy().timeout_secs;
            let failed = invoker::run_handler(handler, message.envelope(), timeout_secs).await.into_error();
            return Ok(match failed {
                None => ResultCode::Ok,
                Some(handler_error) => {
                    message.record_exception(handler_error);
                    ResultCode::AttemptsLimitReached
                }
            });
        }

        let msg_id = message.msg_id();
        let policy = message.policy().clone();

        let first_sighting = self
            .store
            .msetnx(
                &msg_id,
                &[
                    (Subkey::Status, STATUS_INCOMPLETE.to_owned()),
                    (Subkey::Expires, message.envelope().expires_at.to_string()),
                    (Subkey::Timeout, (now + policy.timeout_secs).to_string()),
                ],
            )
            .await
            .map_err(ProcessError::Store)?;
        if first_sighting {
            return self.run_and_record(message, handler).await;
        }

        if self.get(&msg_id, Subkey::Status).await?.as_deref() == Some(STATUS_COMPLETED) {
            self.ack(message).await?;
            return Ok(ResultCode::Ok);
        }

        if self.get_u64(&msg_id, Subkey::Delay).await?.is_some_and(|delay| delay > now) {
            warn!(msg_id = %msg_id, "ignored delayed message");
            return Ok(ResultCode::Delayed);
        }

        let handler_dead = self.get_u64(&msg_id, Subkey::Timeout).await?.is_some_and(|timeout| timeout < now);
        if !handler_dead {
            return Ok(ResultCode::HandlerNotYetTimedOut);
        }

        if self.attempts_limit_reached(&msg_id, &policy).await? {
            self.ack(message).await?;
            return Ok(ResultCode::AttemptsLimitReached);
        }

        if self.exceptions_limit_reached(&msg_id, &policy).await? {
            self.ack(message).await?;
            return Ok(ResultCode::ExceptionsLimitReached);
        }

        // takeover: refresh the running deadline, then race for the mutex
        self.set_u64(&msg_id, Subkey::Timeout, now + policy.timeout_secs).await?;
        if self.store.setnx(&msg_id, Subkey::Mutex, &now.to_string()).await.map_err(ProcessError::Store)? {
            debug!(msg_id = %msg_id, "acquired mutex");
            self.run_and_record(message, handler).await
        } else {
            // a lost race only ever observes a stale lock left by a prior
            // crashed attempt; the live owner refreshes its timeout before
            // doing real work
            self.store.del(&msg_id, Subkey::Mutex).await.map_err(ProcessError::Store)?;
            debug!(msg_id = %msg_id, "failed to acquire mutex");
            Ok(ResultCode::MutexLocked)
        }
    }

    async fn run_and_record<D, H>(
        &self, message: &mut Message<D>, handler: &Arc<H>,
    ) -> Result<ResultCode, ProcessError<S::Error, D::Error>>
    where
        D: Delivery,
        H: Handler,
    {
        let msg_id = message.msg_id();
        let policy = message.policy().clone();
        self.store.incr(&msg_id, Subkey::Attempts).await.map_err(ProcessError::Store)?;

        let failed = invoker::run_handler(handler, message.envelope(), policy.timeout_secs).await.into_error();
        match failed {
            None => {
                self.store.set(&msg_id, Subkey::Status, STATUS_COMPLETED).await.map_err(ProcessError::Store)?;
                self.set_u64(&msg_id, Subkey::Timeout, 0).await?;
                self.ack(message).await?;
                Ok(ResultCode::Ok)
            }
            Some(handler_error) => {
                message.record_exception(handler_error);
                self.store.incr(&msg_id, Subkey::Exceptions).await.map_err(ProcessError::Store)?;

                if self.attempts_limit_reached(&msg_id, &policy).await? {
                    self.ack(message).await?;
                    Ok(ResultCode::AttemptsLimitReached)
                } else if self.exceptions_limit_reached(&msg_id, &policy).await? {
                    self.ack(message).await?;
                    Ok(ResultCode::ExceptionsLimitReached)
                } else {
                    self.store.del(&msg_id, Subkey::Mutex).await.map_err(ProcessError::Store)?;
                    self.set_u64(&msg_id, Subkey::Timeout, 0).await?;
                    self.set_u64(&msg_id, Subkey::Delay, self.clock.now() + policy.delay_secs).await?;
                    Ok(ResultCode::HandlerCrash)
                }
            }
        }
    }

    /// Acks the broker delivery and purges the bookkeeping once the last
    /// expected ack for the message has happened.
    async fn ack<D: Delivery>(&self, message: &Message<D>) -> Result<(), ProcessError<S::Error, D::Error>> {
        message.delivery().ack().await.map_err(ProcessError::Ack)?;
        if message.simple() {
            return Ok(());
        }

        let msg_id = message.msg_id();
        let last_ack = !message.redundant()
            || self.store.incr(&msg_id, Subkey::AckCount).await.map_err(ProcessError::Store)? == 2;
        if last_ack {
            self.store.del_keys(&msg_id).await.map_err(ProcessError::Store)?;
        }
        Ok(())
    }

    async fn get<DE>(&self, msg_id: &MsgId, sub: Subkey) -> Result<Option<String>, ProcessError<S::Error, DE>> {
        self.store.get(msg_id, sub).await.map_err(ProcessError::Store)
    }

    async fn get_u64<DE>(&self, msg_id: &MsgId, sub: Subkey) -> Result<Option<u64>, ProcessError<S::Error, DE>> {
        Ok(self.get(msg_id, sub).await?.and_then(|value| value.parse::<u64>().ok()))
    }

    async fn set_u64<DE>(&self, msg_id: &MsgId, sub: Subkey, value: u64) -> Result<(), ProcessError<S::Error, DE>> {
        self.store.set(msg_id, sub, &value.to_string()).await.map_err(ProcessError::Store)
    }

    async fn attempts_limit_reached<DE>(
        &self, msg_id: &MsgId, policy: &HandlerPolicy,
    ) -> Result<bool, ProcessError<S::Error, DE>> {
        Ok(self.get_u64(msg_id, Subkey::Attempts).await?.unwrap_or(0) >= policy.attempts_limit)
    }

    async fn exceptions_limit_reached<DE>(
        &self, msg_id: &MsgId, policy: &HandlerPolicy,
    ) -> Result<bool, ProcessError<S::Error, DE>> {
        Ok(self.get_u64(msg_id, Subkey::Exceptions).await?.unwrap_or(0) > policy.exceptions_limit)
    }
}
