// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::path::PathBuf;

use brokerfleet::control::SessionState;
use brokerfleet::{FleetConfig, Orchestrator, Topology};

const TEMPLATE: &str = "<broker properties=\"@@PROPERTIESFILE@@\"/>\n";

#[tokio::test(flavor = "multi_thread")]
async fn test_worker_processes_follow_the_control_channel() {
    let templates = tempfile::tempdir().expect("template dir");
    let output = tempfile::tempdir().expect("output dir");

    let mut config = FleetConfig::default();
    std::fs::write(
        templates.path().join(format!("{}.xml", config.templates.broker)),
        TEMPLATE,
    )
    .expect("write template");

    config.base_port = 26000;
    config.template_dir = templates.path().to_path_buf();
    config.output_dir = output.path().to_path_buf();
    config.worker.program = Some(PathBuf::from(env!("CARGO_BIN_EXE_brokerfleet")));
    config.broker_command = vec![
        "/bin/sh".to_string(),
        "-c".to_string(),
        "exec sleep 30".to_string(),
    ];
    config.notify_if_started = true;
    config.notify_if_stopped = true;
    config.start_deadline_ms = Some(20_000);
    config.reclaim_grace_ms = 5_000;

    let mut fleet = Orchestrator::new(Topology::Flat { count: 2 }, config);
    assert_eq!(fleet.execute().await.expect("execute"), 2);
    assert!(fleet.children().iter().all(|child| child.pid().is_some()));

    fleet.stop_all().await.expect("stop");
    let sessions = fleet.coordinator().expect("coordinator").sessions();
    assert!(sessions.iter().all(|s| s.state == SessionState::Stopped));
    assert!(fleet.children().is_empty());

    fleet.shutdown().await.expect("shutdown");
}
