//! Small async helpers shared by the actor loops.

use tokio::sync::mpsc;
use tokio::time::Interval;

/// Tick an optional interval, or park forever when it is unset. Lets a
/// select arm stay in place while the timer it drives comes and goes.
pub(crate) async fn tick_opt(slot: &mut Option<Interval>) {
    match slot {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Receive from an optional channel, or park forever when it is unset.
pub(crate) async fn recv_opt<T>(slot: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match slot {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
