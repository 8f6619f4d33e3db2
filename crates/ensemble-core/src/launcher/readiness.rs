use std::time::Duration;

use tokio::{net::TcpStream, time::sleep};

use crate::process::ExitWatch;

const PROBE_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Readiness {
    Ready,
    Exited(i32),
    TimedOut,
}

/// Waits until a freshly spawned service accepts connections on `port`.
///
/// Services without a port are ready as soon as they are spawned and still alive.
pub(crate) async fn wait_until_ready(
    port: Option<u16>,
    timeout: Duration,
    mut exit: ExitWatch,
) -> Readiness {
    let current = *exit.borrow();
    if let Some(code) = current {
        return Readiness::Exited(code);
    }
    let Some(port) = port else {
        return Readiness::Ready;
    };

    let probe = async {
        while TcpStream::connect(("127.0.0.1", port)).await.is_err() {
            sleep(PROBE_INTERVAL).await;
        }
    };

    tokio::select! {
        () = probe => Readiness::Ready,
        exited = exit.wait_for(Option::is_some) => match exited {
            Ok(code) => Readiness::Exited(code.unwrap_or(-1)),
            Err(_) => Readiness::Exited(-1),
        },
        () = sleep(timeout) => Readiness::TimedOut,
    }
}
