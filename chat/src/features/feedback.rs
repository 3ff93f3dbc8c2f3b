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

use std::sync::Arc;

use ai::FeedbackSink;
use chrono::Utc;
use services::{HandlerContext, HandlerError, HandlerResult, Message as BusMessage};
use storage::MemoryStore;
use tracing::warn;
use uuid::Uuid;

use crate::{models::Feedback, repository::ChatUow};

/// Scores an AI message: -1, 1, or 0 to withdraw. One feedback per
/// user per message.
#[derive(Debug)]
pub struct SubmitFeedback {
	pub message_id: Uuid,
	pub created_by: Uuid,
	pub score: i8,
	pub comment: Option<String>,
}

impl BusMessage for SubmitFeedback {
	type Response = ();
}

pub async fn submit_feedback(request: SubmitFeedback, ctx: HandlerContext) -> HandlerResult<()> {
	if !matches!(request.score, -1 | 0 | 1) {
		return Err(HandlerError::bad_request("score must be -1, 0 or 1"));
	}
	let store = ctx.resolve::<MemoryStore>()?;
	let sink = ctx.resolve::<Arc<dyn FeedbackSink>>()?;
	let uow = ChatUow::begin(&store);
	let message = uow
		.get_message(request.message_id)
		.ok_or_else(|| HandlerError::not_found("Message not found"))?;

	let existing = uow.get_feedback(request.message_id, request.created_by);
	let feedback_id = match (&existing, request.score) {
		(None, 0) => None,
		(Some(existing), 0) => {
			uow.uow.delete::<Feedback>(existing.id);
			Some(existing.id)
		},
		(_, score) => {
			let feedback = Feedback {
				id: existing.as_ref().map(|existing| existing.id).unwrap_or_else(Uuid::new_v4),
				message_id: request.message_id,
				created_by: request.created_by,
				feedback_type: score,
				comment: request.comment.clone(),
				created_at: existing
					.as_ref()
					.map(|existing| existing.created_at)
					.unwrap_or_else(Utc::now),
			};
			let feedback_id = feedback.id;
			uow.uow.add(feedback);
			Some(feedback_id)
		},
	};
	uow.commit().map_err(HandlerError::internal)?;

	// The analytics sink upserts by (id, trace_id); a zero score is a
	// deletion on its side too.
	if let (Some(feedback_id), Some(trace_id)) = (feedback_id, &message.trace_id) {
		if let Err(sink_error) = sink
			.score(request.score, feedback_id, trace_id, request.comment.as_deref())
			.await
		{
			warn!(error = ?sink_error, "feedback sink rejected the score");
		}
	}
	Ok(())
}
