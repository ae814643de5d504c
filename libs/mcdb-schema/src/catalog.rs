//! Production market-data catalog.
//!
//! Assets, providers and their market, order and content data. Every table
//! gets a `<table>_pkey` primary key; lookup tables share the
//! `name`/`description`/`is_active` shape and all tables carry
//! `created_at`/`updated_at` audit timestamps where the data is mutable.

use crate::{Column, ColumnType, DefaultValue, SchemaMetadata, Table};

const SHORT: ColumnType = ColumnType::Varchar(Some(100));
const LONG: ColumnType = ColumnType::Varchar(Some(1000));

fn timestamp() -> ColumnType {
    ColumnType::Timestamp {
        with_time_zone: false,
    }
}

fn id() -> Column {
    Column::new("id", ColumnType::Integer)
        .primary_key()
        .autoincrement()
}

fn fk(name: &str, table: &str) -> Column {
    Column::new(name, ColumnType::Integer).references(table, "id")
}

fn is_active(what: &str) -> Column {
    Column::new("is_active", ColumnType::Boolean)
        .default_value(DefaultValue::Bool(true))
        .comment(format!("Whether the {what} is active"))
}

fn audited(table: Table) -> Table {
    table
        .column(
            Column::new("created_at", timestamp()).default_value(DefaultValue::CurrentTimestamp),
        )
        .column(
            Column::new("updated_at", timestamp()).default_value(DefaultValue::CurrentTimestamp),
        )
}

/// `id`, `name`, `description`, `is_active` plus audit columns.
fn lookup(name: &str, what: &str, comment: &str) -> Table {
    audited(
        Table::new(name)
            .comment(comment)
            .column(id())
            .column(Column::new("name", SHORT))
            .column(Column::new("description", LONG).nullable())
            .column(is_active(what)),
    )
}

fn asset() -> Table {
    audited(
        Table::new("asset")
            .comment("Tradable asset: stock, bond, currency, ...")
            .column(id())
            .column(fk("asset_type_id", "asset_type"))
            .column(Column::new("name", SHORT))
            .column(Column::new("description", LONG).nullable())
            .column(Column::new("symbol", SHORT).nullable())
            .column(fk("underlying_asset_id", "asset").nullable())
            .column(is_active("asset")),
    )
}

fn provider() -> Table {
    audited(
        Table::new("provider")
            .comment("Data vendor, news outlet, social network, ...")
            .column(id())
            .column(fk("provider_type_id", "provider_type"))
            .column(Column::new("name", SHORT))
            .column(Column::new("description", LONG).nullable())
            .column(
                Column::new("provider_external_code", SHORT)
                    .nullable()
                    .comment("Identifier of the provider in its own system"),
            )
            .column(fk("underlying_provider_id", "provider").nullable())
            .column(Column::new("url", LONG).nullable())
            .column(Column::new("image_url", LONG).nullable())
            .column(is_active("provider")),
    )
}

fn provider_asset() -> Table {
    audited(
        Table::new("provider_asset")
            .comment("Maps internal assets to provider asset codes, per day")
            .column(Column::new("date", ColumnType::Date).primary_key())
            .column(fk("provider_id", "provider").primary_key())
            .column(fk("asset_id", "asset").primary_key())
            .column(Column::new("asset_code", SHORT))
            .column(is_active("provider asset")),
    )
}

fn provider_asset_order() -> Table {
    Table::new("provider_asset_order")
        .comment("Order book entries for an asset pair from a provider")
        .column(id())
        .column(Column::new("timestamp", timestamp()))
        .column(fk("provider_id", "provider"))
        .column(fk("from_asset_id", "asset"))
        .column(fk("to_asset_id", "asset"))
        .column(Column::new("price", ColumnType::Double).nullable())
        .column(Column::new("volume", ColumnType::Double).nullable())
}

fn provider_asset_market() -> Table {
    let mut table = Table::new("provider_asset_market")
        .comment("OHLCV market data for an asset pair from a provider")
        .column(Column::new("timestamp", timestamp()).primary_key())
        .column(fk("provider_id", "provider").primary_key())
        .column(
            fk("from_asset_id", "asset")
                .primary_key()
                .comment("Base asset"),
        )
        .column(fk("to_asset_id", "asset").primary_key().comment("Quote asset"));
    for name in ["close", "open", "high", "low", "volume", "best_bid", "best_ask"] {
        table = table.column(Column::new(name, ColumnType::Double).nullable());
    }
    table
}

fn provider_content() -> Table {
    audited(
        Table::new("provider_content")
            .comment("Content published by a provider (articles, posts, ...)")
            .column(id())
            .column(Column::new("timestamp", timestamp()))
            .column(fk("provider_id", "provider"))
            .column(
                Column::new("content_external_code", LONG)
                    .comment("Provider specific identifier, e.g. article URL or post id"),
            )
            .column(fk("content_type_id", "content_type"))
            .column(Column::new("authors", LONG).nullable())
            .column(Column::new("title", LONG).nullable())
            .column(Column::new("description", ColumnType::Varchar(Some(5000))).nullable())
            .column(Column::new("content", ColumnType::Varchar(None))),
    )
}

fn provider_content_sentiment() -> Table {
    let mut table = Table::new("provider_content_sentiment")
        .comment("Internally calculated sentiment of provider content")
        .column(fk("provider_content_id", "provider_content").primary_key())
        .column(fk("sentiment_type_id", "sentiment_type").primary_key())
        .column(Column::new("sentiment_text", LONG).nullable());
    for name in [
        "positive_sentiment_score",
        "negative_sentiment_score",
        "neutral_sentiment_score",
        "sentiment_score",
    ] {
        table = table.column(
            Column::new(name, ColumnType::Double)
                .nullable()
                .comment("Normalized to [0, 1]"),
        );
    }
    audited(table)
}

fn asset_content() -> Table {
    Table::new("asset_content")
        .comment("Links assets to the provider content that mentions them")
        .column(fk("content_id", "provider_content").primary_key())
        .column(fk("asset_id", "asset").primary_key())
        .column(
            Column::new("created_at", timestamp()).default_value(DefaultValue::CurrentTimestamp),
        )
}

/// Builds the production catalog.
///
/// # Panics
/// If the static catalog itself is inconsistent (duplicate tables or columns).
#[must_use]
pub fn schema() -> SchemaMetadata {
    let builder = SchemaMetadata::builder()
        .table(lookup(
            "asset_type",
            "asset type",
            "Kind of asset: stock, bond, currency, ...",
        ))
        .table(asset())
        .table(lookup(
            "provider_type",
            "provider type",
            "Kind of provider: news, social media, ...",
        ))
        .table(provider())
        .table(provider_asset())
        .table(provider_asset_order())
        .table(provider_asset_market())
        .table(lookup(
            "content_type",
            "content type",
            "Kind of content: news, social media, ...",
        ))
        .table(provider_content())
        .table(lookup(
            "sentiment_type",
            "sentiment type",
            "Sentiment calculation method: PROVIDER, NLTK, VADER, ...",
        ))
        .table(provider_content_sentiment())
        .table(asset_content());

    match builder.build() {
        Ok(schema) => schema,
        Err(e) => unreachable!("production catalog is inconsistent: {e}"),
    }
}
