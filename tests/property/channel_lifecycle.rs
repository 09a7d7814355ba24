//! Property tests for the channel lifecycle.
//!
//! Drives a `ChannelManager` over the loopback relay with random sequences of
//! open / transmit / close and checks, after every step, that:
//! 1. A channel is open exactly when the last open of it came after the last
//!    close.
//! 2. Re-opening an open channel with a different password is refused and
//!    leaves the existing session alone.
//! 3. Transmitting on a closed channel is `NotOpen` and never touches the
//!    transport.
//! 4. Closing leaves nothing behind on the relay.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;

use proptest::prelude::*;
use relaybridge::transport::loopback::LoopbackRelay;
use relaybridge::{ChannelError, ChannelManager, ManagerConfig};
use relaybridge_proto::RelayUrl;

const NAMES: [&str; 3] = ["alpha", "beta", "gamma"];

#[derive(Debug, Clone)]
enum Op {
    Open(usize, Option<String>),
    Transmit(usize, String),
    Close(usize),
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..NAMES.len(), prop::option::of("[a-z0-9]{1,8}")).prop_map(|(i, pw)| Op::Open(i, pw)),
        (0..NAMES.len(), "[ -~]{0,16}").prop_map(|(i, msg)| Op::Transmit(i, msg)),
        (0..NAMES.len()).prop_map(Op::Close),
    ]
}

proptest! {
    #[test]
    fn registry_tracks_open_and_close(ops in prop::collection::vec(arb_op(), 1..40)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let relay = LoopbackRelay::new();
            let base = RelayUrl::parse("ws://loopback").unwrap();
            let mgr = ChannelManager::new(relay.connector(), ManagerConfig::new(base));
            let mut model: HashMap<&str, Option<String>> = HashMap::new();

            for op in ops {
                match op {
                    Op::Open(i, pw) => {
                        let result = mgr.open(NAMES[i], pw.as_deref()).await;
                        match model.get(NAMES[i]) {
                            Some(current) if *current != pw => {
                                let forbidden = matches!(result, Err(ChannelError::Forbidden { .. }));
                                prop_assert!(forbidden);
                            }
                            _ => {
                                prop_assert!(result.is_ok());
                                model.insert(NAMES[i], pw);
                            }
                        }
                    }
                    Op::Transmit(i, msg) => {
                        let sends_before = relay.send_attempts();
                        let result = mgr.transmit(NAMES[i], &msg).await;
                        if model.contains_key(NAMES[i]) {
                            prop_assert!(result.is_ok());
                        } else {
                            let not_open = matches!(result, Err(ChannelError::NotOpen { .. }));
                            prop_assert!(not_open);
                            prop_assert_eq!(relay.send_attempts(), sends_before);
                        }
                    }
                    Op::Close(i) => {
                        mgr.close(NAMES[i]).await;
                        model.remove(NAMES[i]);
                        prop_assert_eq!(relay.members(NAMES[i]), 0);
                    }
                }

                for name in NAMES {
                    prop_assert_eq!(mgr.is_open(name), model.contains_key(name));
                }
            }
            Ok::<(), TestCaseError>(())
        })?;
    }
}
