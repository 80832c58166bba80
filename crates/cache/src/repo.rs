//! Repository over the whole catalog: libraries, series, books and covers.
//!
//! Lookups are by id or by path (paths are unique per entity kind). Inserts do
//! not upsert; callers look a path up first and decide between inserting and
//! restoring, and a duplicate insert surfaces as [`ErrorKind::Duplicate`].

use crate::Database;
use crate::error::{Error, ErrorKind, Result};
use crate::models::row::{nanoseconds, path_text, seconds, size};
use crate::models::{
    Book, BookContent, BookId, BookRow, Cover, CoverRow, Library, LibraryId, LibraryRow, Series, SeriesId, SeriesRow,
};
use exn::ResultExt;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::path::Path;
use time::UtcDateTime;

/// Row counts removed by [`Repository::purge_deleted`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Purged {
    pub books: u64,
    pub series: u64,
}

/// Repository for every entity in the catalog.
///
/// # Relationships
///
/// - A library owns many series, a series owns many books, a book has at most
///   one cover.
/// - Series and books are soft-deleted; their rows stay until
///   [`purge_deleted`](Self::purge_deleted) is called.
/// - Soft-deleting a series soft-deletes its books too.
/// - Deleting a library removes everything beneath it.
#[derive(Debug, Clone)]
pub struct Repository {
    pool: SqlitePool,
}
impl From<&Database> for Repository {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl Repository {
    /// Create a new repository with the given connection pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn insert_error(err: sqlx::Error, path: &Path) -> Error {
        let kind = match err.as_database_error() {
            Some(db) if db.is_unique_violation() => ErrorKind::Duplicate(path.to_path_buf()),
            _ => ErrorKind::Database,
        };
        exn::Exn::from(err).raise(kind)
    }

    // =========================================================================
    // Libraries
    // =========================================================================

    pub async fn insert_library(&self, path: impl AsRef<Path>, name: impl AsRef<str>) -> Result<Library> {
        let path = path.as_ref();
        let row: LibraryRow = sqlx::query_as(include_str!("../queries/insert_library.sql"))
            .bind(path_text(path)?)
            .bind(name.as_ref())
            .bind(seconds(UtcDateTime::now()))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Self::insert_error(e, path))?;
        row.try_into()
    }

    pub async fn get_library(&self, id: LibraryId) -> Result<Option<Library>> {
        let row: Option<LibraryRow> = sqlx::query_as(include_str!("../queries/get_library.sql"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Library::try_from).transpose()
    }

    pub async fn get_library_by_path(&self, path: impl AsRef<Path>) -> Result<Option<Library>> {
        let row: Option<LibraryRow> = sqlx::query_as(include_str!("../queries/get_library_by_path.sql"))
            .bind(path_text(path.as_ref())?)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Library::try_from).transpose()
    }

    pub async fn list_libraries(&self) -> Result<Vec<Library>> {
        let rows: Vec<LibraryRow> = sqlx::query_as(include_str!("../queries/list_libraries.sql"))
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Library::try_from).collect()
    }

    /// Delete a library along with every series, book and cover beneath it.
    ///
    /// Returns `false` if no library had that id.
    pub async fn delete_library(&self, id: LibraryId) -> Result<bool> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        for query in [
            include_str!("../queries/delete_library_covers.sql"),
            include_str!("../queries/delete_library_books.sql"),
            include_str!("../queries/delete_library_series.sql"),
        ] {
            sqlx::query(query).bind(id).execute(&mut *tx).await.or_raise(|| ErrorKind::Database)?;
        }
        let result = sqlx::query(include_str!("../queries/delete_library.sql"))
            .bind(id)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Series
    // =========================================================================

    pub async fn insert_series(&self, library_id: LibraryId, path: impl AsRef<Path>) -> Result<Series> {
        let path = path.as_ref();
        let now = seconds(UtcDateTime::now());
        let row: SeriesRow = sqlx::query_as(include_str!("../queries/insert_series.sql"))
            .bind(library_id)
            .bind(path_text(path)?)
            .bind(now)
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Self::insert_error(e, path))?;
        row.try_into()
    }

    pub async fn get_series(&self, id: SeriesId) -> Result<Option<Series>> {
        let row: Option<SeriesRow> = sqlx::query_as(include_str!("../queries/get_series.sql"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Series::try_from).transpose()
    }

    pub async fn get_series_by_path(&self, path: impl AsRef<Path>) -> Result<Option<Series>> {
        let row: Option<SeriesRow> = sqlx::query_as(include_str!("../queries/get_series_by_path.sql"))
            .bind(path_text(path.as_ref())?)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Series::try_from).transpose()
    }

    /// All series of a library that are not flagged as deleted.
    pub async fn list_series(&self, library_id: LibraryId) -> Result<Vec<Series>> {
        let rows: Vec<SeriesRow> = sqlx::query_as(include_str!("../queries/list_series.sql"))
            .bind(library_id)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Series::try_from).collect()
    }

    /// Clear a series' deleted flag and bump its last-update time.
    pub async fn restore_series(&self, id: SeriesId) -> Result<()> {
        sqlx::query(include_str!("../queries/restore_series.sql"))
            .bind(seconds(UtcDateTime::now()))
            .bind(id)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Flag a batch of series as deleted, along with all of their books, and
    /// bump their last-update time.
    pub async fn set_series_deleted(&self, ids: &[SeriesId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut series: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE series SET deleted = 1, updated_at = MAX(updated_at, ");
        series.push_bind(seconds(UtcDateTime::now())).push(") WHERE id IN (");
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        Self::flag_deleted(&mut *tx, series, ids).await?;
        Self::flag_deleted(&mut *tx, QueryBuilder::new("UPDATE books SET deleted = 1 WHERE series_id IN ("), ids).await?;
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Move a series' last-update time forward to `at`.
    ///
    /// Never moves it backwards, so touches applied out of order are harmless.
    pub async fn touch_series(&self, id: SeriesId, at: UtcDateTime) -> Result<()> {
        sqlx::query(include_str!("../queries/touch_series.sql"))
            .bind(seconds(at))
            .bind(id)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    // =========================================================================
    // Books
    // =========================================================================

    /// Insert a newly discovered book, and its cover if it has one.
    pub async fn insert_book(
        &self,
        series_id: SeriesId,
        path: impl AsRef<Path>,
        content: &BookContent,
    ) -> Result<Book> {
        let path = path.as_ref();
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        let row: BookRow = sqlx::query_as(include_str!("../queries/insert_book.sql"))
            .bind(series_id)
            .bind(path_text(path)?)
            .bind(&content.hash)
            .bind(size(content.size)?)
            .bind(nanoseconds(content.modified)?)
            .bind(&content.title)
            .bind(&content.author)
            .bind(&content.manifest)
            .bind(seconds(UtcDateTime::now()))
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| Self::insert_error(e, path))?;
        let book = Book::try_from(row)?;
        if let Some(cover) = &content.cover {
            Self::upsert_cover(&mut *tx, book.id, cover).await?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(book)
    }

    pub async fn get_book(&self, id: BookId) -> Result<Option<Book>> {
        let row: Option<BookRow> = sqlx::query_as(include_str!("../queries/get_book.sql"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Book::try_from).transpose()
    }

    pub async fn get_book_by_path(&self, path: impl AsRef<Path>) -> Result<Option<Book>> {
        let row: Option<BookRow> = sqlx::query_as(include_str!("../queries/get_book_by_path.sql"))
            .bind(path_text(path.as_ref())?)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Book::try_from).transpose()
    }

    /// All books of a series that are not flagged as deleted.
    pub async fn list_books(&self, series_id: SeriesId) -> Result<Vec<Book>> {
        let rows: Vec<BookRow> = sqlx::query_as(include_str!("../queries/list_books.sql"))
            .bind(series_id)
            .fetch_all(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        rows.into_iter().map(Book::try_from).collect()
    }

    /// Record a new size and modify time for a book whose content is known to
    /// be unchanged. Also clears the deleted flag.
    pub async fn update_book_stat(&self, id: BookId, file_size: u64, modified: UtcDateTime) -> Result<()> {
        sqlx::query(include_str!("../queries/update_book_stat.sql"))
            .bind(size(file_size)?)
            .bind(nanoseconds(modified)?)
            .bind(id)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Replace everything known about a book's content, cover included.
    /// Also clears the deleted flag.
    pub async fn update_book_content(&self, id: BookId, content: &BookContent) -> Result<()> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/update_book_content.sql"))
            .bind(&content.hash)
            .bind(size(content.size)?)
            .bind(nanoseconds(content.modified)?)
            .bind(&content.title)
            .bind(&content.author)
            .bind(&content.manifest)
            .bind(id)
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        match &content.cover {
            Some(cover) => Self::upsert_cover(&mut *tx, id, cover).await?,
            None => {
                sqlx::query(include_str!("../queries/delete_cover.sql"))
                    .bind(id)
                    .execute(&mut *tx)
                    .await
                    .or_raise(|| ErrorKind::Database)?;
            },
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    pub async fn restore_book(&self, id: BookId) -> Result<()> {
        sqlx::query(include_str!("../queries/restore_book.sql"))
            .bind(id)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// Flag a batch of books as deleted.
    pub async fn set_books_deleted(&self, ids: &[BookId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.pool.acquire().await.or_raise(|| ErrorKind::Database)?;
        Self::flag_deleted(&mut *conn, QueryBuilder::new("UPDATE books SET deleted = 1 WHERE id IN ("), ids).await
    }

    pub async fn get_cover(&self, book_id: BookId) -> Result<Option<Cover>> {
        let row: Option<CoverRow> = sqlx::query_as(include_str!("../queries/get_cover.sql"))
            .bind(book_id)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        row.map(Cover::try_from).transpose()
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Permanently remove every soft-deleted series and book.
    ///
    /// Books beneath a deleted series are removed even if they were not
    /// flagged themselves.
    pub async fn purge_deleted(&self) -> Result<Purged> {
        let mut tx = self.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        sqlx::query(include_str!("../queries/purge_covers.sql"))
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let books = sqlx::query(include_str!("../queries/purge_books.sql"))
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?
            .rows_affected();
        let series = sqlx::query(include_str!("../queries/purge_series.sql"))
            .execute(&mut *tx)
            .await
            .or_raise(|| ErrorKind::Database)?
            .rows_affected();
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        Ok(Purged { books, series })
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn upsert_cover(conn: &mut SqliteConnection, book_id: BookId, cover: &Cover) -> Result<()> {
        sqlx::query(include_str!("../queries/upsert_cover.sql"))
            .bind(book_id)
            .bind(&cover.data)
            .bind(cover.width.map(i64::from))
            .bind(cover.height.map(i64::from))
            .bind(&cover.thumbnail)
            .bind(&cover.placeholder)
            .execute(conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(())
    }

    /// SQLite has no array binding; build the `IN (...)` list by hand.
    /// Finish `query`, which must end in `IN (`, with the ids and run it.
    async fn flag_deleted(conn: &mut SqliteConnection, mut query: QueryBuilder<'_, Sqlite>, ids: &[i64]) -> Result<()> {
        let mut list = query.separated(", ");
        for id in ids {
            list.push_bind(*id);
        }
        list.push_unseparated(")");
        query.build().execute(conn).await.or_raise(|| ErrorKind::Database)?;
        Ok(())
    }
}
