//! Database schema for the action queue.

use crate::sqlite_column;
use crate::sqlite_persistence::{SqlType, Table, VersionedSchema};
use anyhow::Result;
use rusqlite::Connection;

// =============================================================================
// Version 0
// =============================================================================

const ACTION_QUEUE_TABLE_V0: Table = Table {
    name: "action_queue",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("text", &SqlType::Text, non_null = true),
        sqlite_column!("kind", &SqlType::Text, non_null = true),
        sqlite_column!("source", &SqlType::Text),
        sqlite_column!("group_name", &SqlType::Text),
        sqlite_column!("priority", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("process_started_at", &SqlType::Integer),
        sqlite_column!("duration_ms", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("is_started", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("is_done", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("attempt_count", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("error", &SqlType::Text),
    ],
    indices: &[
        ("idx_action_queue_pending", "is_done, is_started, priority, id"),
        ("idx_action_queue_text", "text, kind"),
    ],
};

// =============================================================================
// Version 1: per-action timeout, retention index
// =============================================================================

const ACTION_QUEUE_TABLE_V1: Table = Table {
    name: "action_queue",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("text", &SqlType::Text, non_null = true),
        sqlite_column!("kind", &SqlType::Text, non_null = true),
        sqlite_column!("source", &SqlType::Text),
        sqlite_column!("group_name", &SqlType::Text),
        sqlite_column!("priority", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("process_started_at", &SqlType::Integer),
        sqlite_column!("duration_ms", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("is_started", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("is_done", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("attempt_count", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("error", &SqlType::Text),
        sqlite_column!("timeout_ms", &SqlType::Integer),
    ],
    indices: &[
        ("idx_action_queue_pending", "is_done, is_started, priority, id"),
        ("idx_action_queue_text", "text, kind"),
        ("idx_action_queue_done_created", "is_done, created_at"),
    ],
};

fn migrate_v0_to_v1(conn: &Connection) -> Result<()> {
    ACTION_QUEUE_TABLE_V1.add_column(conn, "timeout_ms")?;
    ACTION_QUEUE_TABLE_V1.add_index(conn, "idx_action_queue_done_created")
}

pub const ACTION_QUEUE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 0,
        tables: &[ACTION_QUEUE_TABLE_V0],
        migration: None,
    },
    VersionedSchema {
        version: 1,
        tables: &[ACTION_QUEUE_TABLE_V1],
        migration: Some(migrate_v0_to_v1),
    },
];
