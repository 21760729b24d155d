//! SQLite schema definitions for the article database.

use crate::sqlite_column;
use crate::sqlite_persistence::{
    Column, ForeignKey, ForeignKeyOnDelete, SqlType, Table, VersionedSchema,
};

const ARTICLE_FK: ForeignKey = ForeignKey {
    foreign_table: "articles",
    foreign_column: "id",
    on_delete: ForeignKeyOnDelete::Cascade,
};

// =============================================================================
// Version 1 - Articles and the metadata fetch ledger
// =============================================================================

const ARTICLES_TABLE_V1: Table = Table {
    name: "articles",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true), // UUID v4
        sqlite_column!("url", &SqlType::Text, non_null = true, is_unique = true),
        sqlite_column!("title", &SqlType::Text, non_null = true, default_value = Some("''")),
        sqlite_column!(
            "description",
            &SqlType::Text,
            non_null = true,
            default_value = Some("''")
        ),
        sqlite_column!(
            "image_url",
            &SqlType::Text,
            non_null = true,
            default_value = Some("''")
        ),
        sqlite_column!("metadata", &SqlType::Text), // JSON
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[],
};

/// One row per article; `status` is one of pending/success/failed.
const METADATA_FETCH_ATTEMPTS_TABLE_V1: Table = Table {
    name: "metadata_fetch_attempts",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "article_id",
            &SqlType::Text,
            non_null = true,
            is_unique = true,
            foreign_key = Some(&ARTICLE_FK)
        ),
        sqlite_column!("url", &SqlType::Text, non_null = true),
        sqlite_column!(
            "retry_count",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("last_attempt_at", &SqlType::Integer),
        sqlite_column!("next_attempt_at", &SqlType::Integer),
        sqlite_column!(
            "status",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'pending'")
        ),
        sqlite_column!(
            "error_message",
            &SqlType::Text,
            non_null = true,
            default_value = Some("''")
        ),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("updated_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[(
        "idx_metadata_fetch_attempts_status_next",
        "status, next_attempt_at",
    )],
    unique_constraints: &[],
};

// =============================================================================
// Version 2 - User ratings and the precomputed rating aggregate
// =============================================================================

/// `rate` is 0 when the user saved the article without rating it.
const USER_ARTICLES_TABLE_V2: Table = Table {
    name: "user_articles",
    columns: &[
        sqlite_column!("user_id", &SqlType::Text, non_null = true),
        sqlite_column!(
            "article_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&ARTICLE_FK)
        ),
        sqlite_column!("rate", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("collected_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[("idx_user_articles_article_id", "article_id")],
    unique_constraints: &[&["user_id", "article_id"]],
};

/// Rebuilt wholesale by the aggregate refresh job; read by ranking queries.
const ARTICLE_RATING_STATS_TABLE_V2: Table = Table {
    name: "article_rating_stats",
    columns: &[
        sqlite_column!(
            "article_id",
            &SqlType::Text,
            is_primary_key = true,
            foreign_key = Some(&ARTICLE_FK)
        ),
        sqlite_column!("average_rating", &SqlType::Real, non_null = true),
        sqlite_column!("rating_count", &SqlType::Integer, non_null = true),
        sqlite_column!("refreshed_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[(
        "idx_article_rating_stats_average",
        "average_rating DESC",
    )],
    unique_constraints: &[],
};

fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    USER_ARTICLES_TABLE_V2.create(conn)?;
    ARTICLE_RATING_STATS_TABLE_V2.create(conn)?;
    Ok(())
}

pub const ARTICLE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[ARTICLES_TABLE_V1, METADATA_FETCH_ATTEMPTS_TABLE_V1],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            ARTICLES_TABLE_V1,
            METADATA_FETCH_ATTEMPTS_TABLE_V1,
            USER_ARTICLES_TABLE_V2,
            ARTICLE_RATING_STATS_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
];
