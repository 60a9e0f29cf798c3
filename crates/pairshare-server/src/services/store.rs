use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use uuid::Uuid;

use crate::capture::imaging;
use crate::capture::moment::MOMENT_FORMAT;
use crate::capture::{ExpenseBackend, NewExpense};
use crate::db::{now_timestamp, DbPool};
use crate::error::{AppError, AppResult};
use crate::models::{Expense, ExpenseList, ExpenseSummary, NewUser, User};

const USER_COLS: &str = "id, mail, username, fcm_token, created, modified";
const EXPENSE_COLS: &str = "id, list_id, user_name, amount, comment, time_of_expense, image_path, thumbnail_path, created";

fn row_to_user(row: &rusqlite::Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        mail: row.get(1)?,
        username: row.get(2)?,
        fcm_token: row.get(3)?,
        created: row.get(4)?,
        modified: row.get(5)?,
    })
}

fn row_to_expense(row: &rusqlite::Row) -> rusqlite::Result<Expense> {
    Ok(Expense {
        id: row.get(0)?,
        list_id: row.get(1)?,
        user_name: row.get(2)?,
        amount: row.get(3)?,
        comment: row.get(4)?,
        time_of_expense: row.get(5)?,
        image_path: row.get(6)?,
        thumbnail_path: row.get(7)?,
        created: row.get(8)?,
    })
}

fn normalize_mail(mail: &str) -> AppResult<String> {
    let mail = mail.trim().to_lowercase();
    if mail.is_empty() || !mail.contains('@') {
        return Err(AppError::BadRequest("Invalid email address".to_string()));
    }
    Ok(mail)
}

/// SQLite-backed store for users, expense lists and expenses. Receipt
/// photos are written as JPEG files below `image_dir`.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
    image_dir: PathBuf,
    jpeg_quality: u8,
}

impl SqliteStore {
    pub fn new(pool: DbPool, image_dir: impl Into<PathBuf>, jpeg_quality: u8) -> Self {
        Self {
            pool,
            image_dir: image_dir.into(),
            jpeg_quality,
        }
    }

    pub fn image_dir(&self) -> &Path {
        &self.image_dir
    }

    pub fn user_by_mail(&self, mail: &str) -> AppResult<User> {
        let mail = normalize_mail(mail)?;
        let conn = self.pool.get()?;
        conn.query_row(
            &format!("SELECT {USER_COLS} FROM users WHERE mail = ?1"),
            rusqlite::params![mail],
            row_to_user,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => AppError::NotFound("User not found".into()),
            e => AppError::Database(e),
        })
    }

    /// Create a list shared between two registered users.
    pub fn create_expense_list(
        &self,
        name: &str,
        owner_mail: &str,
        invite_mail: &str,
    ) -> AppResult<ExpenseList> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::BadRequest("List name is required".into()));
        }
        let owner = normalize_mail(owner_mail)?;
        let invite = normalize_mail(invite_mail)?;
        if owner == invite {
            return Err(AppError::BadRequest(
                "Cannot share an expense list with yourself".into(),
            ));
        }

        // Both sharers must exist before the list does
        self.user_by_mail(&owner)?;
        self.user_by_mail(&invite)?;

        let id = Uuid::new_v4().to_string();
        let now = now_timestamp();
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO expense_lists (id, name, created, modified) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![id, name, now, now],
        )?;
        for mail in [&owner, &invite] {
            tx.execute(
                "INSERT INTO expense_list_sharers (list_id, user_mail) VALUES (?1, ?2)",
                rusqlite::params![id, mail],
            )?;
        }
        tx.commit()?;

        tracing::info!("Expense list {id} created for {owner} and {invite}");

        let sharer_info = [&owner, &invite]
            .into_iter()
            .map(|mail| (mail.clone(), ExpenseSummary::default()))
            .collect();
        Ok(ExpenseList {
            id,
            name: name.to_string(),
            sharers: vec![owner, invite],
            sharer_info,
            created: now.clone(),
            modified: now,
        })
    }

    /// Lists the user shares, least recently modified first.
    pub fn expense_lists_for(&self, mail: &str) -> AppResult<Vec<ExpenseList>> {
        let mail = normalize_mail(mail)?;
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT l.id FROM expense_lists l
             JOIN expense_list_sharers s ON s.list_id = l.id
             WHERE s.user_mail = ?1
             ORDER BY l.modified",
        )?;
        let ids: Result<Vec<String>, _> = stmt
            .query_map(rusqlite::params![mail], |row| row.get(0))?
            .collect();

        ids?.iter().map(|id| load_list(&conn, id)).collect()
    }

    pub fn expense_list(&self, id: &str) -> AppResult<ExpenseList> {
        let conn = self.pool.get()?;
        load_list(&conn, id)
    }

    /// Expenses of a list, newest first.
    pub fn expenses_in(&self, list_id: &str) -> AppResult<Vec<Expense>> {
        let conn = self.pool.get()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM expense_lists WHERE id = ?1)",
            rusqlite::params![list_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(AppError::NotFound("Expense list not found".into()));
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT {EXPENSE_COLS} FROM expenses WHERE list_id = ?1 ORDER BY created DESC"
        ))?;
        let rows = stmt.query_map(rusqlite::params![list_id], row_to_expense)?;
        let expenses: Result<Vec<_>, _> = rows.collect();
        Ok(expenses?)
    }

    fn store_jpeg(&self, folder: &str, image: &DynamicImage) -> AppResult<String> {
        let bytes = imaging::encode_jpeg(image, self.jpeg_quality)?;
        let dir = self.image_dir.join(folder);
        std::fs::create_dir_all(&dir)?;

        let file_name = format!("{}.jpeg", Uuid::new_v4());
        std::fs::write(dir.join(&file_name), &bytes)?;
        tracing::debug!("Stored {} bytes as {folder}/{file_name}", bytes.len());
        Ok(format!("{folder}/{file_name}"))
    }

    fn remove_stored(&self, relative: &str) {
        if let Err(e) = std::fs::remove_file(self.image_dir.join(relative)) {
            tracing::warn!("Failed to remove orphaned image {relative}: {e}");
        }
    }

    fn insert_expense(&self, expense: &Expense) -> AppResult<()> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;

        if let Some(list_id) = &expense.list_id {
            let sharer = &expense.user_name;
            let affected = tx.execute(
                "UPDATE expense_list_sharers SET num_expenses = num_expenses + 1, sum_expenses = sum_expenses + ?1 WHERE list_id = ?2 AND user_mail = ?3",
                rusqlite::params![expense.amount, list_id, sharer],
            )?;
            if affected == 0 {
                return Err(AppError::NotFound(format!(
                    "Expense list {list_id} not found for {sharer}"
                )));
            }
            tx.execute(
                "UPDATE expense_lists SET modified = ?1 WHERE id = ?2",
                rusqlite::params![expense.created, list_id],
            )?;
        }

        tx.execute(
            &format!("INSERT INTO expenses ({EXPENSE_COLS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"),
            rusqlite::params![
                expense.id, expense.list_id, expense.user_name, expense.amount,
                expense.comment, expense.time_of_expense, expense.image_path,
                expense.thumbnail_path, expense.created
            ],
        )?;
        tx.commit()?;
        Ok(())
    }
}

fn load_list(conn: &rusqlite::Connection, id: &str) -> AppResult<ExpenseList> {
    let (name, created, modified): (String, String, String) = conn
        .query_row(
            "SELECT name, created, modified FROM expense_lists WHERE id = ?1",
            rusqlite::params![id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                AppError::NotFound("Expense list not found".into())
            }
            e => AppError::Database(e),
        })?;

    let mut stmt = conn.prepare(
        "SELECT user_mail, num_expenses, sum_expenses FROM expense_list_sharers WHERE list_id = ?1 ORDER BY rowid",
    )?;
    let rows = stmt.query_map(rusqlite::params![id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            ExpenseSummary {
                num_expenses: row.get(1)?,
                sum_expenses: row.get(2)?,
            },
        ))
    })?;
    let sharers: Vec<(String, ExpenseSummary)> = rows.collect::<Result<_, _>>()?;

    Ok(ExpenseList {
        id: id.to_string(),
        name,
        sharers: sharers.iter().map(|(mail, _)| mail.clone()).collect(),
        sharer_info: sharers.into_iter().collect::<BTreeMap<_, _>>(),
        created,
        modified,
    })
}

impl ExpenseBackend for SqliteStore {
    fn create_or_update_user(&self, user: NewUser) -> AppResult<User> {
        let mail = normalize_mail(&user.mail)?;
        let username = user
            .username
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty());
        let now = now_timestamp();
        let conn = self.pool.get()?;

        // Single statement so concurrent registrations of one mail cannot race
        let saved = conn.query_row(
            &format!(
                "INSERT INTO users ({USER_COLS}) VALUES (?1, ?2, COALESCE(?3, ?2), ?4, ?5, ?5)
                 ON CONFLICT(mail) DO UPDATE SET
                     username = COALESCE(?3, username),
                     fcm_token = COALESCE(?4, fcm_token),
                     modified = ?5
                 RETURNING {USER_COLS}"
            ),
            rusqlite::params![Uuid::new_v4().to_string(), mail, username, user.fcm_token, now],
            row_to_user,
        )?;

        if saved.created == saved.modified {
            tracing::info!("Registered user {mail}");
        } else {
            tracing::debug!("Updated user {mail}");
        }
        Ok(saved)
    }

    fn add_expense(&self, expense: NewExpense) -> AppResult<Expense> {
        let user_name = normalize_mail(&expense.user_name)?;
        let (image_path, thumbnail_path) = match (expense.working_image(), expense.thumbnail()) {
            (Some(working), Some(thumbnail)) => {
                let image_path = self.store_jpeg("images", working)?;
                let thumbnail_path = match self.store_jpeg("thumbnails", thumbnail) {
                    Ok(path) => path,
                    Err(e) => {
                        self.remove_stored(&image_path);
                        return Err(e);
                    }
                };
                (Some(image_path), Some(thumbnail_path))
            }
            _ => (None, None),
        };

        let saved = Expense {
            id: Uuid::new_v4().to_string(),
            list_id: expense.list_id,
            user_name,
            amount: expense.amount,
            comment: expense.comment,
            time_of_expense: expense.moment.format(MOMENT_FORMAT).to_string(),
            image_path,
            thumbnail_path,
            created: now_timestamp(),
        };

        if let Err(e) = self.insert_expense(&saved) {
            for path in [&saved.image_path, &saved.thumbnail_path].into_iter().flatten() {
                self.remove_stored(path);
            }
            return Err(e);
        }

        tracing::info!(
            "Expense {} stored for {} ({})",
            saved.id,
            saved.user_name,
            saved.amount
        );
        Ok(saved)
    }
}
