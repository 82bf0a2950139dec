// This file is part of Gascope.
//
// Gascope is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Gascope is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Gascope.
// If not, see https://www.gnu.org/licenses/.

//! Long running tasks with cooperative shutdown

use async_trait::async_trait;
use futures::{future::try_join_all, Future};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// A long running task that stops when its shutdown token is cancelled
#[async_trait]
pub trait Task: Sync + Send + 'static {
    /// Run the task.
    async fn run(self: Box<Self>, shutdown_token: CancellationToken) -> anyhow::Result<()>;
}

/// Run all tasks until either one of them exits or `signal` resolves, then cancel the rest
/// and wait for every task to return.
pub async fn spawn_tasks_with_shutdown<T, R, E>(
    tasks: impl IntoIterator<Item = Box<dyn Task>>,
    signal: T,
) where
    T: Future<Output = Result<R, E>> + Send + 'static,
    E: std::fmt::Debug,
{
    // every running task holds a sender, recv returns once all are dropped
    let (scope, mut scope_closed) = mpsc::channel::<()>(1);
    let shutdown_token = CancellationToken::new();

    let handles = tasks
        .into_iter()
        .map(|task| {
            let token = shutdown_token.clone();
            let scope = scope.clone();
            let handle = tokio::spawn(async move {
                let ret = task.run(token).await;
                drop(scope);
                ret
            });
            async move { handle.await? }
        })
        .collect::<Vec<_>>();
    drop(scope);

    tokio::select! {
        res = try_join_all(handles) => {
            error!("Task exited unexpectedly: {res:?}");
        }
        res = signal => {
            match res {
                Ok(_) => info!("Received signal, shutting down"),
                Err(err) => error!("Error while waiting for signal: {err:?}"),
            }
        }
    }

    shutdown_token.cancel();
    scope_closed.recv().await;
}
