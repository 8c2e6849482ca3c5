//! Cooperative shutdown.
//!
//! A [`ShutdownToken`] is the flag the scheduler polls between steps. A
//! [`SignalHandler`] registers one token for a set of signals for as long as
//! it lives, so delivery of one of those signals flips that token and nothing
//! else happens in signal context.
//!
//! Handlers may overlap and may be dropped in any order. For every signal the
//! most recently installed live handler covering it receives it; once no
//! handler covers a signal its original disposition is back in place.

use std::ptr;
use std::sync::atomic::{AtomicI32, AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use nix::errno::Errno;
use nix::libc::c_int;
use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use tracing::{debug, warn};

pub const DEFAULT_SIGNALS: [Signal; 3] = [Signal::SIGHUP, Signal::SIGINT, Signal::SIGTERM];

const NOT_REQUESTED: i32 = 0;

/// Slots indexed by signal number.
const SLOTS: usize = 64;

/// Token currently receiving each signal, or null when none is registered.
static TARGETS: [AtomicPtr<AtomicI32>; SLOTS] = [const { AtomicPtr::new(ptr::null_mut()) }; SLOTS];

/// Number of `record_signal` invocations between loading a target and
/// finishing with it.
static IN_FLIGHT: AtomicUsize = AtomicUsize::new(0);

static REGISTRY: Mutex<Registry> = Mutex::new(Registry {
    next_id: 0,
    stack: Vec::new(),
    original: Vec::new(),
});

extern "C" fn record_signal(signo: c_int) {
    IN_FLIGHT.fetch_add(1, Ordering::SeqCst);
    if let Some(slot) = usize::try_from(signo).ok().and_then(|i| TARGETS.get(i)) {
        let target = slot.load(Ordering::SeqCst);
        if !target.is_null() {
            // SAFETY: a published target points into a token kept alive by
            // the registry, which only drops a token after unpublishing it and
            // waiting for IN_FLIGHT to drain.
            let received = unsafe { &*target };
            let _ =
                received.compare_exchange(NOT_REQUESTED, signo, Ordering::SeqCst, Ordering::SeqCst);
        }
    }
    IN_FLIGHT.fetch_sub(1, Ordering::SeqCst);
}

/// Shared, set-once record of a termination request.
#[derive(Clone, Debug, Default)]
pub struct ShutdownToken {
    received: Arc<AtomicI32>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a termination request. Only the first request is honored;
    /// returns whether this call was it.
    pub fn request(&self, signal: Signal) -> bool {
        self.received
            .compare_exchange(
                NOT_REQUESTED,
                signal as i32,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    pub fn is_terminated(&self) -> bool {
        self.received.load(Ordering::SeqCst) != NOT_REQUESTED
    }

    /// The signal that requested termination, if any.
    pub fn signal(&self) -> Option<Signal> {
        match self.received.load(Ordering::SeqCst) {
            NOT_REQUESTED => None,
            signo => Signal::try_from(signo).ok(),
        }
    }

    fn as_target(&self) -> *mut AtomicI32 {
        Arc::as_ptr(&self.received).cast_mut()
    }
}

struct Registration {
    id: u64,
    token: ShutdownToken,
    signals: Vec<Signal>,
}

/// Live handlers in install order, and the dispositions that were in effect
/// before the first of them took each signal.
struct Registry {
    next_id: u64,
    stack: Vec<Registration>,
    original: Vec<(Signal, SigAction)>,
}

impl Registry {
    /// Bring the published target and the disposition of each of `signals`
    /// in line with the current stack.
    fn apply(&mut self, signals: &[Signal]) -> nix::Result<()> {
        for &signal in signals {
            let slot = TARGETS.get(signal as usize).ok_or(Errno::EINVAL)?;
            let owner = self
                .stack
                .iter()
                .rev()
                .find(|registration| registration.signals.contains(&signal));
            let saved = self.original.iter().position(|(s, _)| *s == signal);

            match (owner, saved) {
                (Some(owner), Some(_)) => slot.store(owner.token.as_target(), Ordering::SeqCst),
                (Some(owner), None) => {
                    slot.store(owner.token.as_target(), Ordering::SeqCst);
                    let action = SigAction::new(
                        SigHandler::Handler(record_signal),
                        SaFlags::SA_RESTART,
                        SigSet::empty(),
                    );
                    // SAFETY: `record_signal` only performs atomic operations,
                    // which are async-signal-safe.
                    let previous = unsafe { sigaction(signal, &action) }?;
                    self.original.push((signal, previous));
                    debug!("installed handler for {signal}");
                }
                (None, Some(index)) => {
                    slot.store(ptr::null_mut(), Ordering::SeqCst);
                    // SAFETY: restores the disposition in effect before this
                    // registry first took the signal.
                    unsafe { sigaction(signal, &self.original[index].1) }?;
                    self.original.swap_remove(index);
                    debug!("restored handler for {signal}");
                }
                (None, None) => slot.store(ptr::null_mut(), Ordering::SeqCst),
            }
        }
        Ok(())
    }

    /// Take `id` off the stack and hand its signals to whoever is left.
    fn unregister(&mut self, id: u64) -> Option<Registration> {
        let index = self.stack.iter().position(|r| r.id == id)?;
        let removed = self.stack.remove(index);
        if let Err(e) = self.apply(&removed.signals) {
            warn!("failed to restore signal handlers: {e}");
        }
        Some(removed)
    }
}

fn registry() -> MutexGuard<'static, Registry> {
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Block until no signal handler can still be looking at an unpublished
/// target.
fn wait_for_handlers() {
    while IN_FLIGHT.load(Ordering::SeqCst) != 0 {
        std::hint::spin_loop();
    }
}

/// Scoped registration of termination signals.
///
/// While the handler lives, delivery of any of its signals flips its token.
/// Dropping it hands those signals back to the next most recent live handler
/// or, if there is none, to the disposition that was in effect before.
#[derive(Debug)]
pub struct SignalHandler {
    id: u64,
    token: ShutdownToken,
}

impl SignalHandler {
    pub fn install(signals: &[Signal], token: ShutdownToken) -> nix::Result<Self> {
        let mut registry = registry();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.stack.push(Registration {
            id,
            token: token.clone(),
            signals: signals.to_vec(),
        });

        if let Err(e) = registry.apply(signals) {
            let removed = registry.unregister(id);
            drop(registry);
            wait_for_handlers();
            drop(removed);
            return Err(e);
        }
        Ok(SignalHandler { id, token })
    }

    pub fn token(&self) -> &ShutdownToken {
        &self.token
    }

    pub fn is_terminated(&self) -> bool {
        self.token.is_terminated()
    }

    pub fn signal(&self) -> Option<Signal> {
        self.token.signal()
    }
}

impl Drop for SignalHandler {
    fn drop(&mut self) {
        let removed = registry().unregister(self.id);
        wait_for_handlers();
        drop(removed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::raise;
    use serial_test::serial;

    fn ignore(signal: Signal) -> SigAction {
        let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        unsafe { sigaction(signal, &ignore) }.unwrap()
    }

    /// Put `previous` back and return what was installed.
    fn restore(signal: Signal, previous: &SigAction) -> SigHandler {
        unsafe { sigaction(signal, previous) }.unwrap().handler()
    }

    #[test]
    fn test_token_honors_first_request_only() {
        let token = ShutdownToken::new();
        assert!(!token.is_terminated());
        assert_eq!(token.signal(), None);

        assert!(token.request(Signal::SIGTERM));
        assert!(!token.request(Signal::SIGINT));
        assert!(token.is_terminated());
        assert_eq!(token.signal(), Some(Signal::SIGTERM));

        let clone = token.clone();
        assert_eq!(clone.signal(), Some(Signal::SIGTERM));
    }

    #[test]
    #[serial]
    fn test_delivered_signal_flips_token() {
        let token = ShutdownToken::new();
        let handler = SignalHandler::install(&DEFAULT_SIGNALS, token.clone()).unwrap();

        raise(Signal::SIGHUP).unwrap();
        assert!(handler.is_terminated());
        assert_eq!(token.signal(), Some(Signal::SIGHUP));

        raise(Signal::SIGTERM).unwrap();
        assert_eq!(handler.signal(), Some(Signal::SIGHUP));
    }

    #[test]
    #[serial]
    fn test_drop_restores_previous_disposition() {
        let original = ignore(Signal::SIGUSR1);

        {
            let _handler = SignalHandler::install(&[Signal::SIGUSR1], ShutdownToken::new()).unwrap();
        }

        assert_eq!(restore(Signal::SIGUSR1, &original), SigHandler::SigIgn);
    }

    #[test]
    #[serial]
    fn test_nested_handlers_route_to_innermost_then_outer() {
        let outer_token = ShutdownToken::new();
        let _outer = SignalHandler::install(&[Signal::SIGUSR2], outer_token.clone()).unwrap();

        let inner_token = ShutdownToken::new();
        {
            let _inner = SignalHandler::install(&[Signal::SIGUSR2], inner_token.clone()).unwrap();
            raise(Signal::SIGUSR2).unwrap();
        }
        assert_eq!(inner_token.signal(), Some(Signal::SIGUSR2));
        assert!(!outer_token.is_terminated());

        raise(Signal::SIGUSR2).unwrap();
        assert_eq!(outer_token.signal(), Some(Signal::SIGUSR2));
    }

    #[test]
    #[serial]
    fn test_handlers_dropped_out_of_order() {
        let original = ignore(Signal::SIGUSR1);
        let first_token = ShutdownToken::new();
        let second_token = ShutdownToken::new();
        let first = SignalHandler::install(&[Signal::SIGUSR1], first_token.clone()).unwrap();
        let second = SignalHandler::install(&[Signal::SIGUSR1], second_token.clone()).unwrap();

        drop(first);
        raise(Signal::SIGUSR1).unwrap();
        assert_eq!(second_token.signal(), Some(Signal::SIGUSR1));
        assert!(!first_token.is_terminated());

        drop(second);
        assert!(TARGETS[Signal::SIGUSR1 as usize].load(Ordering::SeqCst).is_null());
        assert_eq!(restore(Signal::SIGUSR1, &original), SigHandler::SigIgn);
    }

    #[test]
    #[serial]
    fn test_outer_signal_survives_inner_drop() {
        let original_usr1 = ignore(Signal::SIGUSR1);
        let original_usr2 = ignore(Signal::SIGUSR2);
        let outer_token = ShutdownToken::new();
        let inner_token = ShutdownToken::new();
        let outer = SignalHandler::install(&[Signal::SIGUSR1], outer_token.clone()).unwrap();
        let inner = SignalHandler::install(
            &[Signal::SIGUSR1, Signal::SIGUSR2],
            inner_token.clone(),
        )
        .unwrap();

        drop(outer);
        raise(Signal::SIGUSR2).unwrap();
        assert_eq!(inner_token.signal(), Some(Signal::SIGUSR2));

        drop(inner);
        assert!(!outer_token.is_terminated());
        assert_eq!(restore(Signal::SIGUSR1, &original_usr1), SigHandler::SigIgn);
        assert_eq!(restore(Signal::SIGUSR2, &original_usr2), SigHandler::SigIgn);
    }
}
