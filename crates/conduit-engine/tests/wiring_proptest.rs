//! Property tests for the wiring registry: any attach order connects the
//! same channels, and any detach order leaves nothing behind.

use conduit_engine::wiring::ChannelStatus;
use conduit_engine::WiringRegistry;
use proptest::prelude::*;

#[derive(Debug, Clone, Copy)]
enum End {
    Producer(u32),
    Consumer(u32),
}

/// All channel ends of a linear stream of `stages` stages.
fn ends(stages: u32) -> Vec<End> {
    (1..stages)
        .flat_map(|i| [End::Producer(i), End::Consumer(i)])
        .collect()
}

fn attach(registry: &WiringRegistry, end: End) {
    match end {
        End::Producer(i) => {
            registry.attach_outbound("g", i).unwrap();
        }
        End::Consumer(i) => {
            registry.attach_inbound("g", i).unwrap();
        }
    }
}

fn detach(registry: &WiringRegistry, end: End) {
    match end {
        End::Producer(i) => registry.detach_outbound("g", i),
        End::Consumer(i) => registry.detach_inbound("g", i),
    }
}

fn ends_strategy() -> impl Strategy<Value = (Vec<End>, Vec<End>)> {
    (2u32..8).prop_flat_map(|stages| {
        (
            Just(ends(stages)).prop_shuffle(),
            Just(ends(stages)).prop_shuffle(),
        )
    })
}

proptest! {
    #[test]
    fn attach_order_does_not_matter((attach_order, detach_order) in ends_strategy()) {
        let registry = WiringRegistry::new(4);
        for end in &attach_order {
            attach(&registry, *end);
        }

        let stages = u32::try_from(attach_order.len() / 2 + 1).unwrap();
        let expected: Vec<ChannelStatus> = (1..stages)
            .map(|i| ChannelStatus {
                name: format!("g.{i}"),
                producer: true,
                consumer: true,
            })
            .collect();
        prop_assert_eq!(registry.channels("g"), expected);

        for end in &detach_order {
            detach(&registry, *end);
        }
        prop_assert_eq!(registry.group_count(), 0);
        prop_assert!(registry.channels("g").is_empty());
    }
}
