use metrics::counter;
use parley_proto::{ClientEvent, SignalEnvelope, UserId};
use tracing::debug;

use crate::registry::SessionRegistry;
use crate::session::{ConnectionTable, SessionHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Delivered(SessionHandle),
    Dropped(DropReason),
}

/// Why an envelope went nowhere; exported as the `reason` metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// No session registered for the target.
    Offline,
    /// The target's connection closed before delivery.
    Closed,
    /// The sending connection never identified itself.
    Anonymous,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Offline => "offline",
            DropReason::Closed => "closed",
            DropReason::Anonymous => "anonymous",
        }
    }
}

/// Forwards negotiation envelopes to the session currently holding the target user.
///
/// Delivery is best effort: nothing is queued for offline users and the
/// sender is never told about a miss.
#[derive(Clone)]
pub struct SignalRouter {
    registry: SessionRegistry,
    connections: ConnectionTable,
}

impl SignalRouter {
    pub fn new(registry: SessionRegistry, connections: ConnectionTable) -> Self {
        Self {
            registry,
            connections,
        }
    }

    /// Stamps `sender` as the origin of `event` and routes it.
    pub fn route_from(&self, sender: &UserId, event: ClientEvent) -> RouteOutcome {
        self.route(event.into_envelope(sender.clone()))
    }

    /// Routes an event read from a connection. Events from a connection
    /// without an identity have no assertable sender and are dropped.
    pub fn route_from_connection(
        &self,
        sender: Option<&UserId>,
        event: ClientEvent,
    ) -> RouteOutcome {
        match sender {
            Some(sender) => self.route_from(sender, event),
            None => dropped(event.kind().as_str(), DropReason::Anonymous),
        }
    }

    pub fn route(&self, envelope: SignalEnvelope) -> RouteOutcome {
        let kind = envelope.kind.as_str();
        let Some(target) = self.registry.lookup(&envelope.to) else {
            debug!(kind, from = %envelope.from, to = %envelope.to, "target offline; dropping signal");
            return dropped(kind, DropReason::Offline);
        };

        let from = envelope.from.clone();
        let to = envelope.to.clone();
        if self.connections.send(target, envelope.into_delivery()) {
            debug!(kind, from = %from, to = %to, session = %target, "signal forwarded");
            counter!("parley_signals_forwarded_total", 1, "kind" => kind);
            RouteOutcome::Delivered(target)
        } else {
            debug!(kind, from = %from, to = %to, session = %target, "target session closed; dropping signal");
            dropped(kind, DropReason::Closed)
        }
    }
}

fn dropped(kind: &'static str, reason: DropReason) -> RouteOutcome {
    counter!("parley_signals_dropped_total", 1, "kind" => kind, "reason" => reason.as_str());
    RouteOutcome::Dropped(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::PresenceBroadcaster;
    use parley_proto::ServerEvent;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Fixture {
        connections: ConnectionTable,
        registry: SessionRegistry,
        router: SignalRouter,
    }

    impl Fixture {
        fn new() -> Self {
            let connections = ConnectionTable::new();
            let registry =
                SessionRegistry::new(Arc::new(PresenceBroadcaster::new(connections.clone())));
            let router = SignalRouter::new(registry.clone(), connections.clone());
            Self {
                connections,
                registry,
                router,
            }
        }

        fn join(&self, user: &str) -> (SessionHandle, UnboundedReceiver<ServerEvent>) {
            let (handle, rx) = self.connections.open(Some(UserId::from(user)));
            self.registry.register(UserId::from(user), handle);
            (handle, rx)
        }
    }

    fn signals(rx: &mut UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if event.signal_kind().is_some() {
                events.push(event);
            }
        }
        events
    }

    #[test_timeout::timeout]
    fn offer_reaches_target_with_server_asserted_sender() {
        let fx = Fixture::new();
        let (_a, mut a_rx) = fx.join("a");
        let (b, mut b_rx) = fx.join("b");

        let offer = json!({"type": "offer", "sdp": "v=0\r\n"});
        let outcome = fx.router.route_from(
            &UserId::from("a"),
            ClientEvent::Offer {
                offer: offer.clone(),
                to: UserId::from("b"),
            },
        );

        assert_eq!(outcome, RouteOutcome::Delivered(b));
        assert_eq!(
            signals(&mut b_rx),
            vec![ServerEvent::Offer {
                offer,
                from: UserId::from("a"),
            }]
        );
        assert!(signals(&mut a_rx).is_empty());
    }

    #[test_timeout::timeout]
    fn offline_target_is_dropped_silently() {
        let fx = Fixture::new();
        let (_a, mut a_rx) = fx.join("a");
        let (_b, mut b_rx) = fx.join("b");

        let outcome = fx.router.route_from(
            &UserId::from("a"),
            ClientEvent::Offer {
                offer: json!({}),
                to: UserId::from("c"),
            },
        );

        assert_eq!(outcome, RouteOutcome::Dropped(DropReason::Offline));
        assert!(signals(&mut a_rx).is_empty());
        assert!(signals(&mut b_rx).is_empty());
    }

    #[test_timeout::timeout]
    fn candidates_keep_send_order() {
        let fx = Fixture::new();
        let _a = fx.join("a");
        let (_b, mut b_rx) = fx.join("b");

        for n in 0..3 {
            fx.router.route_from(
                &UserId::from("a"),
                ClientEvent::IceCandidate {
                    candidate: json!({ "candidate": format!("candidate:{n}") }),
                    to: UserId::from("b"),
                },
            );
        }

        let received: Vec<ServerEvent> = signals(&mut b_rx);
        let expected: Vec<ServerEvent> = (0..3)
            .map(|n| ServerEvent::IceCandidate {
                candidate: json!({ "candidate": format!("candidate:{n}") }),
                from: UserId::from("a"),
            })
            .collect();
        assert_eq!(received, expected);
    }

    #[test_timeout::timeout]
    fn superseded_session_no_longer_receives() {
        let fx = Fixture::new();
        let _a = fx.join("a");
        let (_old, mut old_rx) = fx.join("b");
        let (new, mut new_rx) = fx.join("b");

        let outcome = fx.router.route_from(
            &UserId::from("a"),
            ClientEvent::CallEnded {
                to: UserId::from("b"),
            },
        );

        assert_eq!(outcome, RouteOutcome::Delivered(new));
        assert!(signals(&mut old_rx).is_empty());
        assert_eq!(signals(&mut new_rx), vec![ServerEvent::CallEnded]);
    }

    #[test_timeout::timeout]
    fn envelope_for_closing_session_is_dropped() {
        let fx = Fixture::new();
        let _a = fx.join("a");
        let (b, b_rx) = fx.join("b");
        // Connection gone but the disconnect has not reached the registry yet.
        fx.connections.close(b);
        drop(b_rx);

        let outcome = fx.router.route_from(
            &UserId::from("a"),
            ClientEvent::Answer {
                answer: json!({}),
                to: UserId::from("b"),
            },
        );
        assert_eq!(outcome, RouteOutcome::Dropped(DropReason::Closed));
    }

    #[test_timeout::timeout]
    fn unidentified_sender_cannot_signal() {
        let fx = Fixture::new();
        let (_a, mut a_rx) = fx.join("a");

        let outcome = fx.router.route_from_connection(
            None,
            ClientEvent::Offer {
                offer: json!({}),
                to: UserId::from("a"),
            },
        );

        assert_eq!(outcome, RouteOutcome::Dropped(DropReason::Anonymous));
        assert_eq!(DropReason::Anonymous.as_str(), "anonymous");
        assert!(signals(&mut a_rx).is_empty());
    }
}
