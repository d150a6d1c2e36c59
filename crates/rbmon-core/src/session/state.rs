//! Connection lifecycle as a pure transition function.

/// Where the session is in its lifecycle.
///
/// `Registered` is reachable only from `Connected`, and every loss of the
/// connection leads back to `Disconnected`, so a registered session is always
/// a connected one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Registered,
}

impl SessionState {
    pub fn is_connected(self) -> bool {
        matches!(self, SessionState::Connected | SessionState::Registered)
    }

    pub fn is_registered(self) -> bool {
        self == SessionState::Registered
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    ConnectStarted,
    ConnectSucceeded,
    ConnectFailed,
    RegistrationConfirmed,
    RegistrationRejected,
    RegistrationTimedOut,
    TransportLost,
}

/// Side effects the session performs after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    ResetReconnects,
    SendRegistration,
    /// Schedule the first report and heartbeat of this connection.
    ArmTimers,
    CountFailure,
    MarkConfirmed,
    ResetRegistrationClock,
    ClearRegistration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: SessionState,
    pub effects: Vec<Effect>,
    /// False when the event was not expected in the current state.
    pub expected: bool,
}

impl Transition {
    fn to(next: SessionState, effects: &[Effect]) -> Self {
        Self {
            next,
            effects: effects.to_vec(),
            expected: true,
        }
    }

    fn ignored(state: SessionState) -> Self {
        Self {
            next: state,
            effects: Vec::new(),
            expected: false,
        }
    }
}

pub fn transition(state: SessionState, event: SessionEvent) -> Transition {
    use Effect::*;
    use SessionEvent as E;
    use SessionState as S;

    match (state, event) {
        (S::Disconnected, E::ConnectStarted) => Transition::to(S::Connecting, &[]),
        (S::Connecting, E::ConnectSucceeded) => Transition::to(
            S::Connected,
            &[ResetReconnects, SendRegistration, ResetRegistrationClock, ArmTimers],
        ),
        (S::Connecting, E::ConnectFailed) => Transition::to(S::Disconnected, &[CountFailure]),
        (S::Connected, E::RegistrationConfirmed) => Transition::to(S::Registered, &[MarkConfirmed]),
        (S::Connected, E::RegistrationRejected) => Transition::to(S::Connected, &[]),
        (S::Connected, E::RegistrationTimedOut) => {
            Transition::to(S::Connected, &[SendRegistration, ResetRegistrationClock])
        }
        (S::Connected | S::Registered, E::TransportLost) => {
            Transition::to(S::Disconnected, &[ClearRegistration])
        }
        (S::Registered, E::RegistrationConfirmed) => Transition::to(S::Registered, &[]),
        (state, _) => Transition::ignored(state),
    }
}

/// Consecutive failed connection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectCounter {
    count: u32,
    ceiling: u32,
}

impl ReconnectCounter {
    pub fn new(ceiling: u32) -> Self {
        Self { count: 0, ceiling }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }

    /// Counts a failure. Returns true once the ceiling is reached.
    pub fn record_failure(&mut self) -> bool {
        self.count = (self.count + 1).min(self.ceiling);
        self.count >= self.ceiling
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionEvent as E;
    use SessionState as S;

    const ALL_STATES: [S; 4] = [S::Disconnected, S::Connecting, S::Connected, S::Registered];
    const ALL_EVENTS: [E; 7] = [
        E::ConnectStarted,
        E::ConnectSucceeded,
        E::ConnectFailed,
        E::RegistrationConfirmed,
        E::RegistrationRejected,
        E::RegistrationTimedOut,
        E::TransportLost,
    ];

    #[test]
    fn test_happy_path() {
        let t = transition(S::Disconnected, E::ConnectStarted);
        assert_eq!(t.next, S::Connecting);
        let t = transition(t.next, E::ConnectSucceeded);
        assert_eq!(t.next, S::Connected);
        assert!(t.effects.contains(&Effect::ResetReconnects));
        assert!(t.effects.contains(&Effect::SendRegistration));
        let t = transition(t.next, E::RegistrationConfirmed);
        assert_eq!(t.next, S::Registered);
        assert_eq!(t.effects, vec![Effect::MarkConfirmed]);
    }

    #[test]
    fn test_registration_retry_and_rejection() {
        let t = transition(S::Connected, E::RegistrationTimedOut);
        assert_eq!(t.next, S::Connected);
        assert_eq!(t.effects, vec![Effect::SendRegistration, Effect::ResetRegistrationClock]);

        let t = transition(S::Connected, E::RegistrationRejected);
        assert_eq!(t.next, S::Connected);
        assert!(t.effects.is_empty());
        assert!(t.expected);
    }

    #[test]
    fn test_loss_clears_registration() {
        for from in [S::Connected, S::Registered] {
            let t = transition(from, E::TransportLost);
            assert_eq!(t.next, S::Disconnected);
            assert_eq!(t.effects, vec![Effect::ClearRegistration]);
        }
    }

    #[test]
    fn test_unexpected_events_keep_state() {
        let t = transition(S::Disconnected, E::RegistrationConfirmed);
        assert_eq!(t.next, S::Disconnected);
        assert!(!t.expected);
        assert!(t.effects.is_empty());

        let t = transition(S::Registered, E::RegistrationTimedOut);
        assert_eq!(t.next, S::Registered);
        assert!(!t.expected);
    }

    #[test]
    fn test_registered_only_from_connected() {
        for state in ALL_STATES {
            for event in ALL_EVENTS {
                let t = transition(state, event);
                if t.next == S::Registered {
                    assert!(state.is_connected(), "{:?} + {:?} -> Registered", state, event);
                }
            }
        }
    }

    #[test]
    fn test_scripted_sequences_never_register_while_disconnected() {
        // Fixed-seed LCG.
        let mut seed: u64 = 0x5eed;
        for _ in 0..200 {
            let mut state = S::Disconnected;
            for _ in 0..50 {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let event = ALL_EVENTS[(seed >> 33) as usize % ALL_EVENTS.len()];
                state = transition(state, event).next;
                if state.is_registered() {
                    assert!(state.is_connected());
                }
                if event == E::TransportLost {
                    assert!(!state.is_registered());
                }
            }
        }
    }

    #[test]
    fn test_reconnect_counter() {
        let mut counter = ReconnectCounter::new(3);
        assert!(!counter.record_failure());
        assert!(!counter.record_failure());
        counter.reset();
        assert_eq!(counter.count(), 0);

        assert!(!counter.record_failure());
        assert!(!counter.record_failure());
        assert!(counter.record_failure());
        assert!(counter.record_failure());
        assert_eq!(counter.count(), 3);
    }
}
