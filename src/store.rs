//! SQLite persistence for channels and their videos.
//!
//! Videos point at their channel through a plain `channel_id` column with no
//! foreign key: watch-later rows must survive an unsubscribe of the channel
//! they were attributed to.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use libsql::{Builder, Connection, Row, params};
use tokio::sync::Mutex;

use crate::models::{Category, Channel, NewVideo, Video};

async fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        "#,
    )
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS channels (
            channel_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            last_modified INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS videos (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            video_id TEXT NOT NULL,
            channel_id TEXT NOT NULL,
            uploader_name TEXT NOT NULL DEFAULT '',
            title TEXT NOT NULL,
            time_published INTEGER NOT NULL,
            time_added INTEGER NOT NULL,
            category TEXT NOT NULL,
            length_seconds INTEGER NOT NULL DEFAULT -1
        );

        CREATE INDEX IF NOT EXISTS idx_videos_channel_category ON videos(channel_id, category);
        CREATE INDEX IF NOT EXISTS idx_videos_video_id ON videos(video_id);
        "#,
    )
    .await?;
    Ok(())
}

const VIDEO_COLUMNS: &str = "id, video_id, channel_id, uploader_name, title, \
     time_published, time_added, category, length_seconds";

/// Handle to the subscription database. Cloning is cheap and every clone
/// shares the same connection and write lock.
#[derive(Clone)]
pub struct SubscriptionStore {
    conn: Connection,
    // Writes share one connection, so transactions must not interleave.
    write_lock: Arc<Mutex<()>>,
}

impl SubscriptionStore {
    /// Opens (creating if needed) the database at `path` and provisions the
    /// schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("opening subscription DB {}", path.display()))?;
        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn)
            .await
            .context("creating subscription schema")?;

        Ok(Self {
            conn,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    pub async fn get_channel(&self, channel_id: &str) -> Result<Option<Channel>> {
        let mut rows = self
            .conn
            .query(
                "SELECT channel_id, name, last_modified FROM channels WHERE channel_id = ?1",
                params![channel_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_channel(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn get_all_channels(&self) -> Result<Vec<Channel>> {
        let mut rows = self
            .conn
            .query(
                "SELECT channel_id, name, last_modified FROM channels \
                 ORDER BY name COLLATE NOCASE, channel_id",
                params![],
            )
            .await?;
        let mut channels = Vec::new();
        while let Some(row) = rows.next().await? {
            channels.push(row_to_channel(&row)?);
        }
        Ok(channels)
    }

    /// Inserts `channel` unless its id is already stored. Returns whether a
    /// row was created.
    pub async fn add_channel(&self, channel: &Channel) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let inserted = self
            .conn
            .execute(
                "INSERT INTO channels (channel_id, name, last_modified) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(channel_id) DO NOTHING",
                params![
                    channel.channel_id.as_str(),
                    channel.name.as_str(),
                    channel.last_modified
                ],
            )
            .await
            .with_context(|| format!("inserting channel {}", channel.channel_id))?;
        Ok(inserted > 0)
    }

    /// Deletes the channel together with its videos of `category`. Videos of
    /// other categories are left in place. Returns `false` when the channel
    /// was not stored, in which case nothing is touched.
    pub async fn remove_channel_cascade(&self, channel_id: &str, category: Category) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let tx = self.conn.transaction().await?;
        let removed = tx
            .execute("DELETE FROM channels WHERE channel_id = ?1", params![channel_id])
            .await?;
        if removed == 0 {
            return Ok(false);
        }
        tx.execute(
            "DELETE FROM videos WHERE channel_id = ?1 AND category = ?2",
            params![channel_id, category.as_str()],
        )
        .await?;
        tx.commit()
            .await
            .with_context(|| format!("removing channel {channel_id}"))?;
        Ok(true)
    }

    /// Appends `videos` and raises the channel watermark to `watermark` in a
    /// single transaction. The stored watermark never moves backwards. Fails
    /// without writing anything if the channel is not stored.
    pub async fn commit_sync_batch(
        &self,
        channel_id: &str,
        videos: &[NewVideo],
        watermark: i64,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let tx = self.conn.transaction().await?;

        let updated = tx
            .execute(
                "UPDATE channels SET last_modified = MAX(last_modified, ?2) WHERE channel_id = ?1",
                params![channel_id, watermark],
            )
            .await?;
        if updated == 0 {
            bail!("channel {channel_id} is not stored");
        }

        for video in videos {
            insert_video(&tx, video)
                .await
                .with_context(|| format!("inserting video {}", video.video_id))?;
        }

        tx.commit()
            .await
            .with_context(|| format!("committing sync batch for {channel_id}"))?;
        Ok(())
    }

    /// Stores a single video outside of a sync and returns its surrogate id.
    pub async fn add_video(&self, video: &NewVideo) -> Result<i64> {
        let _guard = self.write_lock.lock().await;
        insert_video(&self.conn, video)
            .await
            .with_context(|| format!("inserting video {}", video.video_id))?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Every video of `category`, newest upload first.
    pub async fn get_videos_by_category(&self, category: Category) -> Result<Vec<Video>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {VIDEO_COLUMNS} FROM videos WHERE category = ?1 \
                     ORDER BY time_published DESC, id DESC"
                ),
                params![category.as_str()],
            )
            .await?;
        collect_videos(&mut rows).await
    }

    pub async fn get_channel_videos(&self, channel_id: &str, category: Category) -> Result<Vec<Video>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {VIDEO_COLUMNS} FROM videos WHERE channel_id = ?1 AND category = ?2 \
                     ORDER BY time_published DESC, id DESC"
                ),
                params![channel_id, category.as_str()],
            )
            .await?;
        collect_videos(&mut rows).await
    }

    /// Deletes every row carrying `video_id`, whatever its category, and
    /// returns how many went away.
    pub async fn remove_videos_by_external_id(&self, video_id: &str) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let removed = self
            .conn
            .execute("DELETE FROM videos WHERE video_id = ?1", params![video_id])
            .await
            .with_context(|| format!("deleting video {video_id}"))?;
        Ok(removed)
    }

    pub async fn has_video(&self, video_id: &str, category: Category) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM videos WHERE video_id = ?1 AND category = ?2 LIMIT 1",
                params![video_id, category.as_str()],
            )
            .await?;
        Ok(rows.next().await?.is_some())
    }
}

async fn insert_video(conn: &Connection, video: &NewVideo) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO videos (
            video_id, channel_id, uploader_name, title,
            time_published, time_added, category, length_seconds
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
        params![
            video.video_id.as_str(),
            video.channel_id.as_str(),
            video.uploader_name.as_str(),
            video.title.as_str(),
            video.time_published,
            video.time_added,
            video.category.as_str(),
            video.length_seconds,
        ],
    )
    .await?;
    Ok(())
}

async fn collect_videos(rows: &mut libsql::Rows) -> Result<Vec<Video>> {
    let mut videos = Vec::new();
    while let Some(row) = rows.next().await? {
        videos.push(row_to_video(&row)?);
    }
    Ok(videos)
}

fn row_to_channel(row: &Row) -> Result<Channel> {
    Ok(Channel {
        channel_id: row.get(0)?,
        name: row.get(1)?,
        last_modified: row.get(2)?,
    })
}

/// Column order follows [`VIDEO_COLUMNS`].
fn row_to_video(row: &Row) -> Result<Video> {
    let category: String = row.get(7)?;
    let category = Category::from_column(&category)
        .ok_or_else(|| anyhow!("unknown video category {category:?} in store"))?;
    Ok(Video {
        id: row.get(0)?,
        video_id: row.get(1)?,
        channel_id: row.get(2)?,
        uploader_name: row.get(3)?,
        title: row.get(4)?,
        time_published: row.get(5)?,
        time_added: row.get(6)?,
        category,
        length_seconds: row.get(8)?,
    })
}


#[cfg(test)]
mod tests {
    use super::testing::{new_video, temp_store};
    use super::*;

    fn ids(videos: &[Video]) -> Vec<&str> {
        videos.iter().map(|video| video.video_id.as_str()).collect()
    }

    #[tokio::test]
    async fn opens_store_with_wal_and_schema() -> Result<()> {
        let (dir, store) = temp_store().await;
        assert!(dir.path().join("db/subfeed.db").exists());

        let mut rows = store.conn.query("PRAGMA journal_mode", params![]).await?;
        let journal: String = rows.next().await?.context("missing journal_mode row")?.get(0)?;
        assert_eq!(journal.to_lowercase(), "wal");

        for table in ["channels", "videos"] {
            let mut rows = store
                .conn
                .query(
                    "SELECT name FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                )
                .await?;
            assert!(rows.next().await?.is_some(), "table {table} missing");
        }
        Ok(())
    }

    #[tokio::test]
    async fn reopening_keeps_existing_rows() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("subfeed.db");
        {
            let store = SubscriptionStore::open(&path).await?;
            store.add_channel(&Channel::new("UC1", "One")).await?;
        }
        let store = SubscriptionStore::open(&path).await?;
        assert_eq!(store.get_channel("UC1").await?, Some(Channel::new("UC1", "One")));
        Ok(())
    }

    #[tokio::test]
    async fn add_channel_rejects_duplicates() -> Result<()> {
        let (_dir, store) = temp_store().await;
        assert!(store.add_channel(&Channel::new("UC1", "First")).await?);
        assert!(!store.add_channel(&Channel::new("UC1", "Renamed")).await?);

        let stored = store.get_channel("UC1").await?.context("channel missing")?;
        assert_eq!(stored.name, "First");
        assert_eq!(stored.last_modified, 0);
        assert_eq!(store.get_channel("UC2").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn lists_channels_by_name() -> Result<()> {
        let (_dir, store) = temp_store().await;
        store.add_channel(&Channel::new("UC2", "beta")).await?;
        store.add_channel(&Channel::new("UC1", "Alpha")).await?;
        let names: Vec<String> = store
            .get_all_channels()
            .await?
            .into_iter()
            .map(|channel| channel.name)
            .collect();
        assert_eq!(names, ["Alpha", "beta"]);
        Ok(())
    }

    #[tokio::test]
    async fn commit_sync_batch_appends_videos_and_raises_watermark() -> Result<()> {
        let (_dir, store) = temp_store().await;
        store.add_channel(&Channel::new("UC1", "One")).await?;

        let batch = [
            new_video("a", "UC1", 100, Category::Subscription),
            new_video("b", "UC1", 200, Category::Subscription),
        ];
        store.commit_sync_batch("UC1", &batch, 200).await?;

        let videos = store.get_channel_videos("UC1", Category::Subscription).await?;
        assert_eq!(ids(&videos), ["b", "a"]);
        assert!(videos[0].id != videos[1].id);
        assert_eq!(store.get_channel("UC1").await?.map(|c| c.last_modified), Some(200));
        Ok(())
    }

    #[tokio::test]
    async fn watermark_never_moves_backwards() -> Result<()> {
        let (_dir, store) = temp_store().await;
        store.add_channel(&Channel::new("UC1", "One")).await?;
        store.commit_sync_batch("UC1", &[], 500).await?;
        store.commit_sync_batch("UC1", &[], 100).await?;
        assert_eq!(store.get_channel("UC1").await?.map(|c| c.last_modified), Some(500));
        Ok(())
    }

    #[tokio::test]
    async fn commit_for_unknown_channel_writes_nothing() -> Result<()> {
        let (_dir, store) = temp_store().await;
        let batch = [new_video("orphan", "UCnope", 10, Category::Subscription)];
        let err = store.commit_sync_batch("UCnope", &batch, 10).await.unwrap_err();
        assert!(err.to_string().contains("not stored"), "{err:#}");
        assert!(store.get_videos_by_category(Category::Subscription).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn unsubscribe_cascade_spares_other_categories() -> Result<()> {
        let (_dir, store) = temp_store().await;
        store.add_channel(&Channel::new("UC1", "One")).await?;
        store
            .commit_sync_batch("UC1", &[new_video("sub", "UC1", 10, Category::Subscription)], 10)
            .await?;
        store
            .add_video(&new_video("later", "UC1", 5, Category::WatchLater))
            .await?;

        assert!(store.remove_channel_cascade("UC1", Category::Subscription).await?);
        assert_eq!(store.get_channel("UC1").await?, None);
        assert!(store.get_videos_by_category(Category::Subscription).await?.is_empty());
        let later = store.get_videos_by_category(Category::WatchLater).await?;
        assert_eq!(ids(&later), ["later"]);

        assert!(!store.remove_channel_cascade("UC1", Category::Subscription).await?);
        Ok(())
    }

    #[tokio::test]
    async fn remove_by_external_id_deletes_every_copy() -> Result<()> {
        let (_dir, store) = temp_store().await;
        store.add_video(&new_video("dup", "UC1", 1, Category::Subscription)).await?;
        store.add_video(&new_video("dup", "UC1", 1, Category::WatchLater)).await?;
        store.add_video(&new_video("keep", "UC1", 2, Category::Subscription)).await?;

        assert_eq!(store.remove_videos_by_external_id("dup").await?, 2);
        assert_eq!(store.remove_videos_by_external_id("dup").await?, 0);
        let left = store.get_videos_by_category(Category::Subscription).await?;
        assert_eq!(ids(&left), ["keep"]);
        Ok(())
    }

    #[tokio::test]
    async fn add_video_returns_surrogate_ids_and_has_video_checks_category() -> Result<()> {
        let (_dir, store) = temp_store().await;
        let first = store.add_video(&new_video("v", "UC1", 1, Category::WatchLater)).await?;
        let second = store.add_video(&new_video("w", "UC1", 2, Category::WatchLater)).await?;
        assert!(second > first);

        assert!(store.has_video("v", Category::WatchLater).await?);
        assert!(!store.has_video("v", Category::Subscription).await?);
        assert!(!store.has_video("x", Category::WatchLater).await?);
        Ok(())
    }
}
