//! SQLite-backed order store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    Batch, NewOrder, Order, OrderFilter, OrderItem, OrderKind, OrderStore, Packaging, Priority,
    SelectedOption, StoreError,
};
use crate::status::Status;

const ORDER_COLUMNS: &str = "id, kind, user, status, status_changed_on, created_on, completed_on, \
     additional_status_info, mission_specific_status_info, reference, remark, priority, packaging, options";

const ITEM_COLUMNS: &str = "id, batch_id, position, item_id, identifier, collection_id, status, \
     status_changed_on, additional_status_info, remark, file_name, downloads, created_on, completed_on, options";

/// SQLite-backed order store.
pub struct SqliteOrderStore {
    conn: Mutex<Connection>,
}

impl SqliteOrderStore {
    /// Open (or create) the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                user TEXT NOT NULL,
                status TEXT NOT NULL,
                status_changed_on TEXT,
                created_on TEXT NOT NULL,
                completed_on TEXT,
                additional_status_info TEXT NOT NULL DEFAULT '',
                mission_specific_status_info TEXT NOT NULL DEFAULT '',
                reference TEXT NOT NULL DEFAULT '',
                remark TEXT NOT NULL DEFAULT '',
                priority TEXT NOT NULL DEFAULT 'STANDARD',
                packaging TEXT,
                options TEXT NOT NULL DEFAULT '[]'
            );

            CREATE TABLE IF NOT EXISTS batches (
                id TEXT PRIMARY KEY,
                order_id TEXT NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                created_on TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS order_items (
                id TEXT PRIMARY KEY,
                batch_id TEXT NOT NULL REFERENCES batches(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                item_id TEXT NOT NULL DEFAULT '',
                identifier TEXT NOT NULL,
                collection_id TEXT NOT NULL DEFAULT '',
                status TEXT NOT NULL,
                status_changed_on TEXT,
                additional_status_info TEXT NOT NULL DEFAULT '',
                remark TEXT NOT NULL DEFAULT '',
                file_name TEXT,
                downloads INTEGER NOT NULL DEFAULT 0,
                created_on TEXT NOT NULL,
                completed_on TEXT,
                options TEXT NOT NULL DEFAULT '[]'
            );

            CREATE INDEX IF NOT EXISTS idx_orders_user ON orders(user);
            CREATE INDEX IF NOT EXISTS idx_orders_status ON orders(status);
            CREATE INDEX IF NOT EXISTS idx_batches_order ON batches(order_id);
            CREATE INDEX IF NOT EXISTS idx_items_batch ON order_items(batch_id);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection lock poisoned".to_string()))
    }

    fn build_where_clause(filter: &OrderFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(Box::new(status.as_str().to_string()));
        }

        if let Some(ref user) = filter.user {
            conditions.push("user = ?");
            params.push(Box::new(user.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_order(row: &rusqlite::Row) -> rusqlite::Result<Order> {
        let kind_json: String = row.get(1)?;
        let status: String = row.get(3)?;
        let priority: String = row.get(11)?;
        let packaging: Option<String> = row.get(12)?;
        let options_json: String = row.get(13)?;

        Ok(Order {
            id: row.get(0)?,
            kind: serde_json::from_str::<OrderKind>(&kind_json).map_err(|e| conversion(1, e))?,
            user: row.get(2)?,
            status: status.parse::<Status>().map_err(|e| conversion(3, e))?,
            status_changed_on: optional_timestamp(row, 4)?,
            created_on: timestamp(row, 5)?,
            completed_on: optional_timestamp(row, 6)?,
            additional_status_info: row.get(7)?,
            mission_specific_status_info: row.get(8)?,
            reference: row.get(9)?,
            remark: row.get(10)?,
            priority: parse_priority(&priority),
            packaging: packaging.as_deref().and_then(parse_packaging),
            options: serde_json::from_str::<Vec<SelectedOption>>(&options_json)
                .map_err(|e| conversion(13, e))?,
            observed_status: None,
        })
    }

    fn row_to_batch(row: &rusqlite::Row) -> rusqlite::Result<Batch> {
        Ok(Batch {
            id: row.get(0)?,
            order_id: row.get(1)?,
            position: row.get(2)?,
            created_on: timestamp(row, 3)?,
        })
    }

    fn row_to_item(row: &rusqlite::Row) -> rusqlite::Result<OrderItem> {
        let status: String = row.get(6)?;
        let options_json: String = row.get(14)?;

        Ok(OrderItem {
            id: row.get(0)?,
            batch_id: row.get(1)?,
            position: row.get(2)?,
            item_id: row.get(3)?,
            identifier: row.get(4)?,
            collection_id: row.get(5)?,
            status: status.parse::<Status>().map_err(|e| conversion(6, e))?,
            status_changed_on: optional_timestamp(row, 7)?,
            additional_status_info: row.get(8)?,
            remark: row.get(9)?,
            file_name: row.get(10)?,
            downloads: row.get(11)?,
            created_on: timestamp(row, 12)?,
            completed_on: optional_timestamp(row, 13)?,
            options: serde_json::from_str::<Vec<SelectedOption>>(&options_json)
                .map_err(|e| conversion(14, e))?,
            observed_status: None,
        })
    }
}

fn conversion<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn timestamp(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion(idx, e))
}

fn optional_timestamp(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| {
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| conversion(idx, e))
    })
    .transpose()
}

fn parse_priority(raw: &str) -> Priority {
    match raw {
        "FAST_TRACK" => Priority::FastTrack,
        _ => Priority::Standard,
    }
}

fn parse_packaging(raw: &str) -> Option<Packaging> {
    match raw {
        "bzip2" => Some(Packaging::Bzip2),
        _ => None,
    }
}

fn rfc3339(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(|dt| dt.to_rfc3339())
}

impl OrderStore for SqliteOrderStore {
    fn insert(&self, new_order: &NewOrder) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let order = &new_order.order;

        tx.execute(
            &format!(
                "INSERT INTO orders ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                ORDER_COLUMNS
            ),
            params![
                order.id,
                serde_json::to_string(&order.kind)?,
                order.user,
                order.status.as_str(),
                rfc3339(order.status_changed_on),
                order.created_on.to_rfc3339(),
                rfc3339(order.completed_on),
                order.additional_status_info,
                order.mission_specific_status_info,
                order.reference,
                order.remark,
                order.priority.as_str(),
                order.packaging.map(|p| p.as_str()),
                serde_json::to_string(&order.options)?,
            ],
        )?;

        for new_batch in &new_order.batches {
            let batch = &new_batch.batch;
            tx.execute(
                "INSERT INTO batches (id, order_id, position, created_on) VALUES (?, ?, ?, ?)",
                params![
                    batch.id,
                    batch.order_id,
                    batch.position,
                    batch.created_on.to_rfc3339()
                ],
            )?;

            for item in &new_batch.items {
                tx.execute(
                    &format!(
                        "INSERT INTO order_items ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                        ITEM_COLUMNS
                    ),
                    params![
                        item.id,
                        item.batch_id,
                        item.position,
                        item.item_id,
                        item.identifier,
                        item.collection_id,
                        item.status.as_str(),
                        rfc3339(item.status_changed_on),
                        item.additional_status_info,
                        item.remark,
                        item.file_name,
                        item.downloads,
                        item.created_on.to_rfc3339(),
                        rfc3339(item.completed_on),
                        serde_json::to_string(&item.options)?,
                    ],
                )?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    fn get_order(&self, id: &str) -> Result<Option<Order>, StoreError> {
        let conn = self.conn()?;
        let order = conn
            .query_row(
                &format!("SELECT {} FROM orders WHERE id = ?", ORDER_COLUMNS),
                params![id],
                Self::row_to_order,
            )
            .optional()?;
        Ok(order)
    }

    fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, StoreError> {
        let conn = self.conn()?;
        let (where_clause, mut params) = Self::build_where_clause(filter);
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));

        let sql = format!(
            "SELECT {} FROM orders {} ORDER BY created_on DESC, id LIMIT ? OFFSET ?",
            ORDER_COLUMNS, where_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let orders = stmt
            .query_map(param_refs.as_slice(), Self::row_to_order)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(orders)
    }

    fn count_orders(&self, filter: &OrderFilter) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        let (where_clause, params) = Self::build_where_clause(filter);
        let sql = format!("SELECT COUNT(*) FROM orders {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let count = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;
        Ok(count)
    }

    fn save_order(&self, order: &Order) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE orders SET status = ?, status_changed_on = ?, completed_on = ?, \
             additional_status_info = ?, mission_specific_status_info = ? WHERE id = ?",
            params![
                order.status.as_str(),
                rfc3339(order.status_changed_on),
                rfc3339(order.completed_on),
                order.additional_status_info,
                order.mission_specific_status_info,
                order.id,
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::order_not_found(&order.id));
        }
        Ok(())
    }

    fn get_batch(&self, id: &str) -> Result<Option<Batch>, StoreError> {
        let conn = self.conn()?;
        let batch = conn
            .query_row(
                "SELECT id, order_id, position, created_on FROM batches WHERE id = ?",
                params![id],
                Self::row_to_batch,
            )
            .optional()?;
        Ok(batch)
    }

    fn list_batches(&self, order_id: &str) -> Result<Vec<Batch>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, order_id, position, created_on FROM batches WHERE order_id = ? ORDER BY position",
        )?;
        let batches = stmt
            .query_map(params![order_id], Self::row_to_batch)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(batches)
    }

    fn get_item(&self, id: &str) -> Result<Option<OrderItem>, StoreError> {
        let conn = self.conn()?;
        let item = conn
            .query_row(
                &format!("SELECT {} FROM order_items WHERE id = ?", ITEM_COLUMNS),
                params![id],
                Self::row_to_item,
            )
            .optional()?;
        Ok(item)
    }

    fn list_items(&self, batch_id: &str) -> Result<Vec<OrderItem>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM order_items WHERE batch_id = ? ORDER BY position",
            ITEM_COLUMNS
        ))?;
        let items = stmt
            .query_map(params![batch_id], Self::row_to_item)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn save_item(&self, item: &OrderItem) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE order_items SET status = ?, status_changed_on = ?, additional_status_info = ?, \
             file_name = ?, downloads = ?, completed_on = ? WHERE id = ?",
            params![
                item.status.as_str(),
                rfc3339(item.status_changed_on),
                item.additional_status_info,
                item.file_name,
                item.downloads,
                rfc3339(item.completed_on),
                item.id,
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::item_not_found(&item.id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::{CreateItemRequest, CreateOrderRequest};
    use crate::status::StatusChangeTracker;

    fn sample_order() -> NewOrder {
        CreateOrderRequest::product_order("alice")
            .with_reference("my-ref")
            .with_priority(Priority::FastTrack)
            .with_option("format", "GeoTIFF")
            .with_batch(vec![
                CreateItemRequest::new("p-1").with_item_id("a"),
                CreateItemRequest::new("p-2").with_item_id("b"),
            ])
            .with_batch(vec![CreateItemRequest::new("p-3")])
            .into_new_order(&StatusChangeTracker::default())
    }

    #[test]
    fn test_insert_and_get_order() {
        let store = SqliteOrderStore::in_memory().unwrap();
        let new_order = sample_order();
        store.insert(&new_order).unwrap();

        let order = store.get_order(&new_order.order.id).unwrap().unwrap();
        assert_eq!(order.user, "alice");
        assert_eq!(order.kind, OrderKind::ProductOrder);
        assert_eq!(order.status, Status::Submitted);
        assert_eq!(order.priority, Priority::FastTrack);
        assert_eq!(order.reference, "my-ref");
        assert_eq!(order.options, vec![SelectedOption::new("format", "GeoTIFF")]);
        assert_eq!(order.status_changed_on, new_order.order.status_changed_on);
    }

    #[test]
    fn test_get_missing_returns_none() {
        let store = SqliteOrderStore::in_memory().unwrap();
        assert!(store.get_order("nope").unwrap().is_none());
        assert!(store.get_batch("nope").unwrap().is_none());
        assert!(store.get_item("nope").unwrap().is_none());
    }

    #[test]
    fn test_batches_and_items_keep_position_order() {
        let store = SqliteOrderStore::in_memory().unwrap();
        let new_order = sample_order();
        store.insert(&new_order).unwrap();

        let batches = store.list_batches(&new_order.order.id).unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].position, 0);
        assert_eq!(batches[1].position, 1);

        let items = store.list_items(&batches[0].id).unwrap();
        let identifiers: Vec<_> = items.iter().map(|i| i.identifier.as_str()).collect();
        assert_eq!(identifiers, vec!["p-1", "p-2"]);
        assert_eq!(items[0].item_id, "a");
    }

    #[test]
    fn test_save_item_updates_mutable_fields() {
        let store = SqliteOrderStore::in_memory().unwrap();
        let new_order = sample_order();
        store.insert(&new_order).unwrap();

        let mut item = new_order.batches[0].items[0].clone();
        item.status = Status::Completed;
        item.file_name = Some("p-1.tif".to_string());
        item.downloads = 2;
        item.completed_on = Some(Utc::now());
        store.save_item(&item).unwrap();

        let loaded = store.get_item(&item.id).unwrap().unwrap();
        assert_eq!(loaded.status, Status::Completed);
        assert_eq!(loaded.file_name.as_deref(), Some("p-1.tif"));
        assert_eq!(loaded.downloads, 2);
        assert!(loaded.completed_on.is_some());
    }

    #[test]
    fn test_save_unknown_entity_fails() {
        let store = SqliteOrderStore::in_memory().unwrap();
        let new_order = sample_order();
        let err = store.save_order(&new_order.order).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "order", .. }));
    }

    #[test]
    fn test_list_and_count_with_filter() {
        let store = SqliteOrderStore::in_memory().unwrap();
        let first = sample_order();
        store.insert(&first).unwrap();
        let second = CreateOrderRequest::product_order("bob")
            .with_batch(vec![CreateItemRequest::new("x")])
            .into_new_order(&StatusChangeTracker::default());
        store.insert(&second).unwrap();

        let mut order = store.get_order(&second.order.id).unwrap().unwrap();
        order.status = Status::Accepted;
        store.save_order(&order).unwrap();

        assert_eq!(store.count_orders(&OrderFilter::new()).unwrap(), 2);
        assert_eq!(
            store
                .count_orders(&OrderFilter::new().with_status(Status::Accepted))
                .unwrap(),
            1
        );
        let alice = store
            .list_orders(&OrderFilter::new().with_user("alice"))
            .unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].id, first.order.id);
    }

    #[test]
    fn test_subscription_kind_round_trips() {
        let store = SqliteOrderStore::in_memory().unwrap();
        let mut request = CreateOrderRequest::product_order("carol");
        request.kind = OrderKind::SubscriptionOrder {
            subscription_id: "sub-9".to_string(),
        };
        let new_order = request.into_new_order(&StatusChangeTracker::default());
        store.insert(&new_order).unwrap();

        let order = store.get_order(&new_order.order.id).unwrap().unwrap();
        assert_eq!(
            order.kind,
            OrderKind::SubscriptionOrder {
                subscription_id: "sub-9".to_string()
            }
        );
    }
}
