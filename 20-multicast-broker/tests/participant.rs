use std::{
    net::{IpAddr, Ipv4Addr},
    path::Path,
    time::Duration,
};

use anyhow::Result;
use multicast_broker::{
    config::{CoordinatorConfig, ParticipantConfig},
    participant::{ListenerState, Participant, ShellCommand},
    protocol::Reply,
    server::Server,
};
use tokio::{net::TcpListener, sync::oneshot, time::timeout};

async fn start_server() -> Result<(u16, oneshot::Sender<()>)> {
    let mut config = CoordinatorConfig::new(0, Duration::from_secs(5));
    config.close_grace = Duration::from_millis(10);
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let server = Server::new(listener, &config);
    let port = server.local_addr()?.port();

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = server
            .run_until(async move {
                let _ = shutdown_rx.await;
            })
            .await;
    });
    Ok((port, shutdown_tx))
}

fn participant(dir: &Path, id: u64, coordinator_port: u16) -> Participant {
    let config = ParticipantConfig {
        id,
        log_path: dir.join(format!("participant-{id}.log")),
        coordinator_host: "127.0.0.1".to_string(),
        coordinator_port,
    };
    Participant::new(&config).with_bind_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

async fn wait_for_log(path: &Path, expected: &str) -> Result<()> {
    timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(contents) = tokio::fs::read_to_string(path).await {
                if contents == expected {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await?;
    Ok(())
}

#[tokio::test]
async fn rejected_request_keeps_the_current_listener() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (port, shutdown) = start_server().await?;
    let mut one = participant(dir.path(), 1, port);

    assert_eq!(
        one.execute(ShellCommand::Register { port: 0 }).await?,
        Reply::Registered
    );
    let first = one.listener().expect("listener after register").local_addr();

    // Still active, so the coordinator refuses and the old listener stays.
    assert_eq!(
        one.execute(ShellCommand::Reconnect { port: 0 }).await?,
        Reply::AlreadyConnectedOrNotFound
    );
    let current = one.listener().expect("listener kept");
    assert_eq!(current.local_addr(), first);
    assert_eq!(current.state(), ListenerState::Listening);

    assert_eq!(
        one.execute(ShellCommand::Register { port: 0 }).await?,
        Reply::AlreadyRegistered
    );
    assert_eq!(one.listener().map(|l| l.local_addr()), Some(first));

    one.shutdown().await;
    let _ = shutdown.send(());
    Ok(())
}

#[tokio::test]
async fn disconnect_and_reconnect_move_deliveries_to_the_new_listener() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (port, shutdown) = start_server().await?;
    let mut one = participant(dir.path(), 1, port);
    let mut two = participant(dir.path(), 2, port);

    one.execute(ShellCommand::Register { port: 0 }).await?;
    two.execute(ShellCommand::Register { port: 0 }).await?;

    assert_eq!(
        two.execute(ShellCommand::Disconnect).await?,
        Reply::Disconnected
    );
    assert!(two.listener().is_none());

    assert_eq!(
        one.execute(ShellCommand::Msend {
            message: "while you were out".into()
        })
        .await?,
        Reply::Acknowledged
    );

    assert_eq!(
        two.execute(ShellCommand::Reconnect { port: 0 }).await?,
        Reply::Reconnected
    );
    assert!(two.listener().is_some());

    let log_two = dir.path().join("participant-2.log");
    wait_for_log(&log_two, "while you were out\n").await?;

    assert_eq!(
        one.execute(ShellCommand::Msend {
            message: "welcome back".into()
        })
        .await?,
        Reply::Acknowledged
    );
    wait_for_log(&log_two, "while you were out\nwelcome back\n").await?;
    wait_for_log(
        &dir.path().join("participant-1.log"),
        "while you were out\nwelcome back\n",
    )
    .await?;

    assert_eq!(
        two.execute(ShellCommand::Deregister).await?,
        Reply::Deregistered
    );
    assert!(two.listener().is_none());

    one.shutdown().await;
    let _ = shutdown.send(());
    Ok(())
}

#[tokio::test]
async fn unreachable_coordinator_is_an_error_and_no_listener_is_kept() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let closed = TcpListener::bind("127.0.0.1:0").await?;
    let port = closed.local_addr()?.port();
    drop(closed);

    let mut one = participant(dir.path(), 1, port);
    assert!(one.execute(ShellCommand::Register { port: 0 }).await.is_err());
    assert!(one.listener().is_none());
    Ok(())
}
