// Copyright (C) 2024 Onyx Technologies, Inc.
// This file is part of Onyx.

// The Licensed Work is licensed under the Business Source License 1.1 (BSL 1.1).
// You may use this file in compliance with the BSL 1.1, subject to the following restrictions:
// 1. You may not use the Licensed Work for AI-related services, database services,
//    or any service or product offering that provides database, big data, or analytics
//    services to third parties unless explicitly authorized by Onyx Technologies, Inc.
// 2. For more details, see the LICENSE file or visit https://mariadb.com/bsl11/.

// The Licensed Work is provided "AS IS", WITHOUT WARRANTY OF ANY KIND, express or implied,
// including but not limited to the warranties of merchantability, fitness for a particular purpose,
// and non-infringement. See the Business Source License for more details.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::models::{Integration, Task};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
	Queued,
	Running,
	Success,
	Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskResult {
	pub state: TaskState,
	pub date_done: Option<i64>,
}

/// External pipeline queue for integrations whose slug the catalog
/// cannot ingest natively.
#[async_trait]
pub trait TaskQueue: Send + Sync {
	async fn publish_integration_created(&self, integration: &Integration)
		-> anyhow::Result<Task>;

	async fn get_task_result_by_id(
		&self,
		external_id: &str,
		slug: &str,
	) -> anyhow::Result<Option<TaskResult>>;

	async fn is_task_running(&self, external_id: &str, slug: &str) -> anyhow::Result<bool> {
		let result = self.get_task_result_by_id(external_id, slug).await?;
		Ok(matches!(
			result,
			Some(TaskResult { state: TaskState::Queued | TaskState::Running, .. })
		))
	}
}

impl std::fmt::Debug for dyn TaskQueue {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("TaskQueue").finish()
	}
}

/// In-memory queue; doubles as the test fake and the single-node
/// default.
#[derive(Default)]
pub struct MemoryTaskQueue {
	tasks: std::sync::Mutex<Vec<(Task, TaskResult)>>,
}

impl MemoryTaskQueue {
	pub fn complete(&self, external_id: &str, state: TaskState) {
		let mut tasks = self.tasks.lock().expect("lock should not be poisoned");
		if let Some((_, result)) =
			tasks.iter_mut().find(|(task, _)| task.external_id == external_id)
		{
			result.state = state;
			result.date_done = Some(common::now_unix_seconds());
		}
	}
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
	async fn publish_integration_created(
		&self,
		integration: &Integration,
	) -> anyhow::Result<Task> {
		let task = Task {
			id: Uuid::new_v4(),
			queue_system: "memory".to_string(),
			external_id: Uuid::new_v4().to_string(),
			payload: json!({
				"integration_id": integration.id,
				"slug": integration.slug,
			}),
		};
		let mut tasks = self.tasks.lock().expect("lock should not be poisoned");
		tasks.push((task.clone(), TaskResult { state: TaskState::Queued, date_done: None }));
		Ok(task)
	}

	async fn get_task_result_by_id(
		&self,
		external_id: &str,
		_slug: &str,
	) -> anyhow::Result<Option<TaskResult>> {
		let tasks = self.tasks.lock().expect("lock should not be poisoned");
		Ok(tasks
			.iter()
			.find(|(task, _)| task.external_id == external_id)
			.map(|(_, result)| result.clone()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn integration() -> Integration {
		Integration {
			id: Uuid::new_v4(),
			organization_id: Uuid::new_v4(),
			namespace_id: Uuid::new_v4(),
			name: "crm".to_string(),
			slug: "crm".to_string(),
			configuration: String::new(),
		}
	}

	#[tokio::test]
	async fn test_published_task_starts_queued() {
		let queue = MemoryTaskQueue::default();
		let task = queue.publish_integration_created(&integration()).await.unwrap();
		assert!(queue.is_task_running(&task.external_id, "crm").await.unwrap());
		let result =
			queue.get_task_result_by_id(&task.external_id, "crm").await.unwrap().unwrap();
		assert_eq!(result.state, TaskState::Queued);
		assert!(result.date_done.is_none());
	}

	#[tokio::test]
	async fn test_completed_task_reports_done() {
		let queue = MemoryTaskQueue::default();
		let task = queue.publish_integration_created(&integration()).await.unwrap();
		queue.complete(&task.external_id, TaskState::Success);
		assert!(!queue.is_task_running(&task.external_id, "crm").await.unwrap());
		let result =
			queue.get_task_result_by_id(&task.external_id, "crm").await.unwrap().unwrap();
		assert_eq!(result.state, TaskState::Success);
		assert!(result.date_done.is_some());
	}
}
