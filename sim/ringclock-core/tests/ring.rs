use ringclock_core::{
    message::parse_clock,
    recorder::MemoryRecorder,
    task::ScriptedTasks,
    EventKind, ExitStatus, Machine, MachineConfig, MachineState, RingConfig,
};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;

/// Binds `count` consecutive ports and keeps them bound, so nothing else can
/// take them before the machines start.
async fn reserve_ring(count: u16) -> (u16, Vec<TcpListener>) {
    'search: loop {
        let first = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = first.local_addr().unwrap().port();
        if base.checked_add(count).is_none() {
            continue;
        }
        let mut listeners = vec![first];
        for offset in 1..count {
            match TcpListener::bind(("127.0.0.1", base + offset)).await {
                Ok(listener) => listeners.push(listener),
                Err(_) => continue 'search,
            }
        }
        return (base, listeners);
    }
}

fn config(id: usize, ring: RingConfig) -> MachineConfig {
    MachineConfig::new(id, ring)
        .rate(20)
        .duration(Duration::from_secs(1))
        .settle(Duration::from_millis(50))
        .connect_delay(Duration::from_millis(10))
        .connect_retry(Duration::from_millis(50))
        .read_timeout(Duration::from_millis(50))
        .grace(Duration::from_millis(50))
        .seed(262)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ntest::timeout(30000)]
async fn three_machines_in_a_ring() {
    let (base_port, listeners) = reserve_ring(3).await;
    let ring = RingConfig::new(3, base_port);
    let recorders: Vec<_> = (0..3).map(|_| Arc::new(MemoryRecorder::new())).collect();
    let machines: Vec<_> = recorders
        .iter()
        .enumerate()
        .map(|(id, recorder)| {
            // Every machine opens with a send on both links, then stays quiet
            let machine = Machine::new(config(id, ring), recorder.clone())
                .unwrap()
                .with_tasks(ScriptedTasks::from_codes([3]));
            Arc::new(machine)
        })
        .collect();

    let runs: Vec<_> = machines
        .iter()
        .zip(listeners)
        .map(|(machine, listener)| {
            let machine = machine.clone();
            tokio::spawn(async move { machine.run_with_listener(listener).await })
        })
        .collect();
    for run in runs {
        assert_eq!(run.await.unwrap().unwrap(), ExitStatus::TimedOut);
    }

    for (machine, recorder) in machines.iter().zip(&recorders) {
        // One connection on each link, never reopened
        assert_eq!(machine.outbound().connections(), 1);
        assert_eq!(machine.inbound().connections(), 1);
        assert_eq!(machine.outbound().sent(), 1);
        assert_eq!(machine.inbound().sent(), 1);

        let events = recorder.events();
        let sends = events.iter().filter(|event| event.kind == EventKind::Send);
        assert_eq!(sends.count(), 1);
        let received: Vec<_> = events
            .iter()
            .filter(|event| event.kind == EventKind::Received)
            .collect();
        assert_eq!(received.len(), 2, "machine {}", machine.id());
        for event in received {
            let remote = parse_clock(event.message.as_deref().unwrap()).unwrap();
            assert!(event.clock > remote);
        }

        // Clock values reported to the recorder never go down
        for pair in events.windows(2) {
            assert!(pair[1].clock > pair[0].clock);
        }
    }

    for machine in &machines {
        assert!(machine.cleanup().await);
        assert!(!machine.cleanup().await);
        assert_eq!(machine.state(), MachineState::Stopped);
    }
}
