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

use common::ClickHouseConfig;
use serde_json::Value;
use tracing::debug;

use crate::{StorageError, StorageErrorKind, StorageResult};

/// Logical column types carried by a stream's property schema.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PropertyType {
	String,
	Integer,
	Float,
	Boolean,
	Timestamp,
}

impl PropertyType {
	pub fn from_name(name: &str) -> Self {
		match name {
			"integer" => Self::Integer,
			"float" => Self::Float,
			"boolean" => Self::Boolean,
			"timestamp" => Self::Timestamp,
			_ => Self::String,
		}
	}

	fn column_type(&self) -> &'static str {
		match self {
			Self::String => "String",
			Self::Integer => "Int64",
			Self::Float => "Float64",
			Self::Boolean => "UInt8",
			Self::Timestamp => "DateTime64(3)",
		}
	}
}

/// Renders the idempotent DDL for one stream's staging table:
/// `MergeTree` ordered by the key properties, `CREATE TABLE IF NOT
/// EXISTS` unless `rewrite` asks for a drop-and-recreate.
pub fn create_table_sql(
	database: &str,
	table: &str,
	properties: &[(String, String)],
	key_properties: &[String],
	rewrite: bool,
) -> Vec<String> {
	let columns = properties
		.iter()
		.map(|(name, type_name)| {
			format!("`{name}` {}", PropertyType::from_name(type_name).column_type())
		})
		.collect::<Vec<_>>()
		.join(", ");
	let order_by = if key_properties.is_empty() {
		"tuple()".to_string()
	} else {
		format!(
			"({})",
			key_properties.iter().map(|key| format!("`{key}`")).collect::<Vec<_>>().join(", ")
		)
	};
	let mut statements = Vec::new();
	if rewrite {
		statements.push(format!("DROP TABLE IF EXISTS `{database}`.`{table}`"));
	}
	statements.push(format!(
		"CREATE TABLE IF NOT EXISTS `{database}`.`{table}` ({columns}) ENGINE = MergeTree ORDER BY {order_by}"
	));
	statements
}

pub fn create_database_sql(database: &str) -> String {
	format!("CREATE DATABASE IF NOT EXISTS `{database}`")
}

/// Staging client over the columnar store's HTTP interface.
#[derive(Clone, Debug)]
pub struct ClickHouseClient {
	http: reqwest::Client,
	config: ClickHouseConfig,
}

impl ClickHouseClient {
	pub fn new(config: ClickHouseConfig) -> StorageResult<Self> {
		let http = reqwest::Client::builder().build().map_err(StorageError::from)?;
		Ok(Self { http, config })
	}

	pub async fn execute(&self, sql: &str) -> StorageResult<()> {
		debug!(sql = %sql, "staging ddl");
		let response = self
			.http
			.post(&self.config.endpoint)
			.basic_auth(&self.config.username, Some(&self.config.password))
			.body(sql.to_string())
			.send()
			.await?;
		if !response.status().is_success() {
			let status = response.status();
			let body = response.text().await.unwrap_or_default();
			return Err(StorageError::new(
				StorageErrorKind::SchemaCreation,
				anyhow::anyhow!("statement failed with {status}: {body}"),
			));
		}
		Ok(())
	}

	pub async fn ensure_database(&self, database: &str) -> StorageResult<()> {
		self.execute(&create_database_sql(database)).await
	}

	/// Inserts one batch of typed rows, one JSON document per row.
	pub async fn insert_rows(
		&self,
		database: &str,
		table: &str,
		rows: &[Value],
	) -> StorageResult<()> {
		if rows.is_empty() {
			return Ok(());
		}
		let mut body = String::new();
		for row in rows {
			body.push_str(&serde_json::to_string(row)?);
			body.push('\n');
		}
		let query = format!("INSERT INTO `{database}`.`{table}` FORMAT JSONEachRow");
		let response = self
			.http
			.post(&self.config.endpoint)
			.basic_auth(&self.config.username, Some(&self.config.password))
			.query(&[("query", query.as_str())])
			.body(body)
			.send()
			.await?;
		if !response.status().is_success() {
			let status = response.status();
			let body = response.text().await.unwrap_or_default();
			return Err(StorageError::new(
				StorageErrorKind::Insertion,
				anyhow::anyhow!("insert into `{database}`.`{table}` failed with {status}: {body}"),
			));
		}
		Ok(())
	}
}
