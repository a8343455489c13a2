use std::time::Duration;

use async_trait::async_trait;
use tokio::{task::JoinHandle, time::timeout};

/// Trait for long-running components driven by the controller.
///
/// # Methods
/// * `run` - Runs the component until it observes shutdown
/// * `name` - Returns the name identifier of the component
#[async_trait]
pub trait Runnable: Send {
    async fn run(&mut self);

    fn name(&self) -> &str;
}

/// Named group of runnables spawned together and awaited together on shutdown.
pub struct TasksGroup {
    name: String,
    pending: Vec<Box<dyn Runnable>>,
    handles: Vec<(String, JoinHandle<()>)>,
}

impl TasksGroup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pending: vec![],
            handles: vec![],
        }
    }

    pub fn add_task(&mut self, task: Box<dyn Runnable>) {
        self.pending.push(task);
    }

    /// Spawns every task added since the last call.
    pub fn run(&mut self) {
        for mut task in self.pending.drain(..) {
            let name = task.name().to_string();
            tracing::debug!("{} starting {}", self.name, name);
            let handle = tokio::spawn(async move {
                task.run().await;
            });
            self.handles.push((name, handle));
        }
    }

    pub async fn wait_for_shutdown(&mut self, handle_timeout: Duration, group_timeout: Duration) {
        tracing::debug!("{} waiting for shutdown", self.name);
        match timeout(group_timeout, self.shutdown(handle_timeout)).await {
            Ok(()) => {
                tracing::info!("{} shutdown complete", self.name);
            }
            Err(_) => {
                tracing::warn!(
                    "{} shutdown timed out after {} seconds",
                    self.name,
                    group_timeout.as_secs()
                );
                for (_, handle) in &self.handles {
                    handle.abort();
                }
            }
        }
    }

    async fn shutdown(&mut self, wait_timeout: Duration) {
        for (name, handle) in self.handles.iter_mut() {
            tracing::debug!("{} waiting for {} seconds", name, wait_timeout.as_secs());
            match timeout(wait_timeout, &mut *handle).await {
                Ok(Ok(())) => {
                    tracing::debug!("{} shutdown complete", name);
                }
                Ok(Err(e)) => {
                    tracing::warn!("failed to wait for shutdown of {}: {}", name, e);
                }
                Err(_) => {
                    tracing::warn!(
                        "{} shutdown timed out after {} seconds",
                        name,
                        wait_timeout.as_secs()
                    );
                    handle.abort();
                }
            }
        }
    }

    /// Returns true once every spawned task has returned.
    pub fn is_finished(&self) -> bool {
        self.handles.iter().all(|(_, handle)| handle.is_finished())
    }
}
