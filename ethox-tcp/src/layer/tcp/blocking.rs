//! Blocking calls on a shared engine.
//!
//! The engine itself never blocks. This wraps it together with its IP layer in a mutex, the one
//! lock protecting all engine state. A blocking call submits with `Wait::Suspend` and, if
//! suspended, waits on a condition variable until its waiter was resumed or the timeout passed.
//! Every change to the engine made through [`process`] wakes all blocked callers to check their
//! waiter.
//!
//! [`process`]: struct.Blocking.html#method.process
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::layer::{Error, Result};
use crate::layer::buffer::BufferKey;
use crate::layer::ip::Ip;

use super::endpoint::Endpoint;
use super::socket::SocketKey;
use super::suspend::{Outcome, Wait, WaiterKey, Wakeup};

/// An engine and its IP layer, shared between threads.
pub struct Blocking<'a, I> {
    inner: Mutex<Shared<'a, I>>,
    cond: Condvar,
}

struct Shared<'a, I> {
    endpoint: Endpoint<'a>,
    ip: I,
}

/// How a blocking call completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Completed<T> {
    /// The call completed without waiting.
    Value(T),
    /// The caller was resumed, the call has completed or should be retried.
    Woken,
    /// Data was handed over while waiting.
    Received(BufferKey),
}

impl<'a, I: Ip> Blocking<'a, I> {
    /// Share an engine.
    pub fn new(endpoint: Endpoint<'a>, ip: I) -> Self {
        Blocking {
            inner: Mutex::new(Shared { endpoint, ip }),
            cond: Condvar::new(),
        }
    }

    /// Run code on the engine, then wake all blocked callers.
    ///
    /// Use this for received segments and the periodic timers.
    pub fn process<R>(&self, f: impl FnOnce(&mut Endpoint<'a>, &mut I) -> R) -> R {
        let result = {
            let mut guard = self.lock();
            let shared = &mut *guard;
            f(&mut shared.endpoint, &mut shared.ip)
        };
        self.cond.notify_all();
        result
    }

    /// Run a call that may suspend and wait for it to complete.
    ///
    /// The call is made with `Wait::Suspend`. On timeout the waiter is cleaned up as by
    /// `suspension_timeout` and its failure returned.
    pub fn call<T>(
        &self,
        timeout: Duration,
        op: impl FnOnce(&mut Endpoint<'a>, &mut I, Wait) -> Result<Outcome<T>>,
    ) -> Result<Completed<T>> {
        self.call_until(Instant::now() + timeout, op)
    }

    /// Send all of a buffer, waiting for the window as often as needed.
    pub fn send(&self, socket: SocketKey, buffer: BufferKey, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let completed = self.call_until(deadline, |endpoint, ip, wait| {
                endpoint.socket_send(ip, socket, buffer, wait)
            })?;
            if let Completed::Value(()) = completed {
                return Ok(());
            }
        }
    }

    /// Wait for the next buffer of data.
    pub fn receive(&self, socket: SocketKey, timeout: Duration) -> Result<BufferKey> {
        let deadline = Instant::now() + timeout;
        loop {
            let completed = self.call_until(deadline, |endpoint, ip, wait| {
                endpoint.socket_receive(ip, socket, wait)
            })?;
            match completed {
                Completed::Value(buffer) | Completed::Received(buffer) => return Ok(buffer),
                Completed::Woken => (),
            }
        }
    }

    /// Take the engine back.
    pub fn into_inner(self) -> (Endpoint<'a>, I) {
        let shared = self.inner.into_inner().unwrap_or_else(PoisonError::into_inner);
        (shared.endpoint, shared.ip)
    }

    fn call_until<T>(
        &self,
        deadline: Instant,
        op: impl FnOnce(&mut Endpoint<'a>, &mut I, Wait) -> Result<Outcome<T>>,
    ) -> Result<Completed<T>> {
        let mut guard = self.lock();
        let outcome = {
            let shared = &mut *guard;
            op(&mut shared.endpoint, &mut shared.ip, Wait::Suspend)
        };
        // The call may have resumed other waiters.
        self.cond.notify_all();

        let waiter = match outcome? {
            Outcome::Ready(value) => return Ok(Completed::Value(value)),
            Outcome::InProgress => return Err(Error::InProgress),
            Outcome::Suspended(waiter) => waiter,
        };

        loop {
            if let Some(wakeup) = guard.endpoint.take_resumed(waiter) {
                return completed(wakeup);
            }

            let now = Instant::now();
            if now >= deadline {
                return self.expire(&mut guard, waiter);
            }

            guard = match self.cond.wait_timeout(guard, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn expire<T>(&self, guard: &mut MutexGuard<Shared<'a, I>>, waiter: WaiterKey) -> Result<Completed<T>> {
        let shared = &mut **guard;
        let wakeup = shared.endpoint.suspension_timeout(&mut shared.ip, waiter)?;
        self.cond.notify_all();
        completed(wakeup)
    }

    fn lock(&self) -> MutexGuard<Shared<'a, I>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn completed<T>(wakeup: Wakeup) -> Result<Completed<T>> {
    match wakeup {
        Wakeup::Ready => Ok(Completed::Woken),
        Wakeup::Received(buffer) => Ok(Completed::Received(buffer)),
        Wakeup::Failed(err) => Err(err),
    }
}
