use chrono::{Duration, Utc};
use sqlx::{QueryBuilder, Sqlite};

use crate::{
    errors::AppError,
    structs::{
        InventoryRecord, NewInventory, Organization, PasswordReset, PpeCategory, PpeType, User,
    },
    utils::hash_password,
    AppState,
};

const USER_COLUMNS: &str = "id, username, email, first_name, last_name, pwd_hash, \
                            organization_id, timezone, created_at, updated_at";
const ORGANIZATION_COLUMNS: &str = "id, name, code, parent_id, is_provider, created_at";

const INVENTORY_SELECT: &str = r#"
    SELECT i.id, i.organization_id, o.name AS organization_name, i.user_id, i.ppe_type_id,
           p.item_type, p.item_attribute, p.size, i.number, i.item_number, i.daily_use,
           i.projected_daily_use, i.projected_run_out, i.comments, i.timestamp
    FROM inventories i
    JOIN organizations o ON o.id = i.organization_id
    JOIN ppe_types p ON p.id = i.ppe_type_id
"#;

/// Reset links stay valid for this long.
const PASSWORD_RESET_TTL_HOURS: i64 = 24;

pub struct NewUser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    pub timezone: String,
}

pub async fn get_user_by_id(state: &AppState, id: i64) -> Result<Option<User>, sqlx::Error> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE id = ?",
        USER_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&state.db_pool)
    .await?;
    Ok(user)
}

/// Looks a user up by username or email, case-insensitively.
pub async fn find_user_by_login(
    state: &AppState,
    login: &str,
) -> Result<Option<User>, sqlx::Error> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE lower(username) = lower(?) OR lower(email) = lower(?)",
        USER_COLUMNS
    ))
    .bind(login)
    .bind(login)
    .fetch_optional(&state.db_pool)
    .await?;
    Ok(user)
}

pub async fn find_user_by_email(
    state: &AppState,
    email: &str,
) -> Result<Option<User>, sqlx::Error> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {} FROM users WHERE lower(email) = lower(?)",
        USER_COLUMNS
    ))
    .bind(email)
    .fetch_optional(&state.db_pool)
    .await?;
    Ok(user)
}

pub async fn username_taken(state: &AppState, username: &str) -> Result<bool, sqlx::Error> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE lower(username) = lower(?)")
            .bind(username)
            .fetch_one(&state.db_pool)
            .await?;
    Ok(count > 0)
}

pub async fn email_taken(state: &AppState, email: &str) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE lower(email) = lower(?)")
        .bind(email)
        .fetch_one(&state.db_pool)
        .await?;
    Ok(count > 0)
}

pub async fn create_user(state: &AppState, new_user: NewUser) -> Result<User, AppError> {
    let created_at = Utc::now();
    let pwd_hash = hash_password(&new_user.password)?;
    let user = sqlx::query_as::<_, User>(&format!(
        "INSERT INTO users (username, email, first_name, last_name, pwd_hash, timezone, \
         created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?) RETURNING {}",
        USER_COLUMNS
    ))
    .bind(&new_user.username)
    .bind(new_user.email.to_lowercase())
    .bind(&new_user.first_name)
    .bind(&new_user.last_name)
    .bind(pwd_hash)
    .bind(&new_user.timezone)
    .bind(created_at)
    .bind(created_at)
    .fetch_one(&state.db_pool)
    .await?;
    log::info!("User created: {} ({})", user.username, user.id);
    Ok(user)
}

pub async fn get_organization_by_id(
    state: &AppState,
    id: i64,
) -> Result<Option<Organization>, sqlx::Error> {
    sqlx::query_as::<_, Organization>(&format!(
        "SELECT {} FROM organizations WHERE id = ?",
        ORGANIZATION_COLUMNS
    ))
    .bind(id)
    .fetch_optional(&state.db_pool)
    .await
}

pub async fn get_organization_by_code(
    state: &AppState,
    code: &str,
) -> Result<Option<Organization>, sqlx::Error> {
    sqlx::query_as::<_, Organization>(&format!(
        "SELECT {} FROM organizations WHERE code = ?",
        ORGANIZATION_COLUMNS
    ))
    .bind(code)
    .fetch_optional(&state.db_pool)
    .await
}

pub async fn organization_name_taken(state: &AppState, name: &str) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM organizations WHERE name = ?")
        .bind(name)
        .fetch_one(&state.db_pool)
        .await?;
    Ok(count > 0)
}

/// Creates an organization and makes `user_id` its first member in one transaction.
pub async fn create_organization_for_user(
    state: &AppState,
    user_id: i64,
    name: &str,
    is_provider: bool,
    parent_id: Option<i64>,
) -> Result<Organization, AppError> {
    let mut tx = state.db_pool.begin().await?;

    let organization = sqlx::query_as::<_, Organization>(&format!(
        "INSERT INTO organizations (name, code, parent_id, is_provider, created_at) \
         VALUES (?, ?, ?, ?, ?) RETURNING {}",
        ORGANIZATION_COLUMNS
    ))
    .bind(name)
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(parent_id)
    .bind(is_provider)
    .bind(Utc::now())
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("UPDATE users SET organization_id = ?, updated_at = ? WHERE id = ?")
        .bind(organization.id)
        .bind(Utc::now())
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    log::info!(
        "Organization created: {} ({}, provider: {})",
        organization.name,
        organization.id,
        organization.is_provider
    );
    Ok(organization)
}

pub async fn join_organization(
    state: &AppState,
    user_id: i64,
    organization_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET organization_id = ?, updated_at = ? WHERE id = ?")
        .bind(organization_id)
        .bind(Utc::now())
        .bind(user_id)
        .execute(&state.db_pool)
        .await?;
    log::info!("User {} joined organization {}", user_id, organization_id);
    Ok(())
}

/// All organizations below `organization_id`, in pre-order, excluding the root.
pub async fn get_descendants(
    state: &AppState,
    organization_id: i64,
) -> Result<Vec<Organization>, sqlx::Error> {
    sqlx::query_as::<_, Organization>(
        r#"
        WITH RECURSIVE subtree(id, path) AS (
            SELECT id, printf('%010d', id) FROM organizations WHERE parent_id = ?
            UNION ALL
            SELECT o.id, s.path || '/' || printf('%010d', o.id)
            FROM organizations o
            JOIN subtree s ON o.parent_id = s.id
        )
        SELECT o.id, o.name, o.code, o.parent_id, o.is_provider, o.created_at
        FROM organizations o
        JOIN subtree s ON s.id = o.id
        ORDER BY s.path
        "#,
    )
    .bind(organization_id)
    .fetch_all(&state.db_pool)
    .await
}

pub async fn get_descendant_providers(
    state: &AppState,
    organization_id: i64,
) -> Result<Vec<Organization>, sqlx::Error> {
    let descendants = get_descendants(state, organization_id).await?;
    Ok(descendants.into_iter().filter(|o| o.is_provider).collect())
}

pub async fn get_ppe_types(
    state: &AppState,
    category: PpeCategory,
) -> Result<Vec<PpeType>, sqlx::Error> {
    sqlx::query_as::<_, PpeType>(
        "SELECT id, item_type, item_attribute, size FROM ppe_types \
         WHERE item_type = ? ORDER BY item_attribute, size",
    )
    .bind(category)
    .fetch_all(&state.db_pool)
    .await
}

/// Inserts a validated formset in one transaction.
pub async fn insert_inventories(
    state: &AppState,
    user_id: i64,
    organization_id: i64,
    rows: &[NewInventory],
) -> Result<(), sqlx::Error> {
    let timestamp = Utc::now();
    let mut tx = state.db_pool.begin().await?;
    for row in rows {
        sqlx::query(
            "INSERT INTO inventories (organization_id, user_id, ppe_type_id, number, \
             item_number, daily_use, projected_daily_use, projected_run_out, comments, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(organization_id)
        .bind(user_id)
        .bind(row.ppe_type_id)
        .bind(row.number)
        .bind(&row.item_number)
        .bind(row.daily_use)
        .bind(row.projected_daily_use)
        .bind(row.projected_run_out)
        .bind(&row.comments)
        .bind(timestamp)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    log::info!(
        "User {} submitted {} inventory row(s) for organization {}",
        user_id,
        rows.len(),
        organization_id
    );
    Ok(())
}

pub async fn get_recent_inventory(
    state: &AppState,
    organization_id: i64,
    category: PpeCategory,
    limit: i64,
) -> Result<Vec<InventoryRecord>, sqlx::Error> {
    sqlx::query_as::<_, InventoryRecord>(&format!(
        "{} WHERE i.organization_id = ? AND p.item_type = ? \
         ORDER BY i.timestamp DESC, i.id DESC LIMIT ?",
        INVENTORY_SELECT
    ))
    .bind(organization_id)
    .bind(category)
    .bind(limit)
    .fetch_all(&state.db_pool)
    .await
}

pub async fn count_inventory(state: &AppState, organization_id: i64) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM inventories WHERE organization_id = ?")
        .bind(organization_id)
        .fetch_one(&state.db_pool)
        .await
}

pub async fn get_inventory_page(
    state: &AppState,
    organization_id: i64,
    limit: i64,
    offset: i64,
) -> Result<Vec<InventoryRecord>, sqlx::Error> {
    sqlx::query_as::<_, InventoryRecord>(&format!(
        "{} WHERE i.organization_id = ? ORDER BY i.timestamp DESC, i.id DESC LIMIT ? OFFSET ?",
        INVENTORY_SELECT
    ))
    .bind(organization_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(&state.db_pool)
    .await
}

/// Inventory of several organizations, oldest first, optionally restricted to one category.
pub async fn get_inventory_for_organizations(
    state: &AppState,
    organization_ids: &[i64],
    category: Option<PpeCategory>,
) -> Result<Vec<InventoryRecord>, sqlx::Error> {
    if organization_ids.is_empty() {
        return Ok(Vec::new());
    }

    let mut query: QueryBuilder<Sqlite> = QueryBuilder::new(INVENTORY_SELECT);
    query.push(" WHERE i.organization_id IN (");
    let mut ids = query.separated(", ");
    for id in organization_ids {
        ids.push_bind(*id);
    }
    ids.push_unseparated(")");
    if let Some(category) = category {
        query.push(" AND p.item_type = ").push_bind(category);
    }
    query.push(" ORDER BY i.timestamp ASC, i.id ASC");

    query
        .build_query_as::<InventoryRecord>()
        .fetch_all(&state.db_pool)
        .await
}

pub async fn get_inventory_for_user(
    state: &AppState,
    user_id: i64,
    category: PpeCategory,
) -> Result<Vec<InventoryRecord>, sqlx::Error> {
    sqlx::query_as::<_, InventoryRecord>(&format!(
        "{} WHERE i.user_id = ? AND p.item_type = ? ORDER BY i.timestamp ASC, i.id ASC",
        INVENTORY_SELECT
    ))
    .bind(user_id)
    .bind(category)
    .fetch_all(&state.db_pool)
    .await
}

pub async fn create_password_reset(
    state: &AppState,
    user_id: i64,
) -> Result<PasswordReset, sqlx::Error> {
    let created_at = Utc::now();
    let reset = sqlx::query_as::<_, PasswordReset>(
        "INSERT INTO password_resets (user_id, token, created_at, expires_at, used) \
         VALUES (?, ?, ?, ?, 0) RETURNING id, user_id, token, created_at, expires_at, used",
    )
    .bind(user_id)
    .bind(uuid::Uuid::new_v4().simple().to_string())
    .bind(created_at)
    .bind(created_at + Duration::hours(PASSWORD_RESET_TTL_HOURS))
    .fetch_one(&state.db_pool)
    .await?;
    log::info!("Password reset requested for user {}", user_id);
    Ok(reset)
}

/// An unused, unexpired reset token belonging to `user_id`.
pub async fn find_valid_password_reset(
    state: &AppState,
    user_id: i64,
    token: &str,
) -> Result<Option<PasswordReset>, sqlx::Error> {
    let reset = sqlx::query_as::<_, PasswordReset>(
        "SELECT id, user_id, token, created_at, expires_at, used FROM password_resets \
         WHERE user_id = ? AND token = ? AND used = 0",
    )
    .bind(user_id)
    .bind(token)
    .fetch_optional(&state.db_pool)
    .await?;
    Ok(reset.filter(|r| r.expires_at > Utc::now()))
}

/// Sets the new password and burns every outstanding token of the user.
pub async fn complete_password_reset(
    state: &AppState,
    reset: &PasswordReset,
    password: &str,
) -> Result<(), AppError> {
    let pwd_hash = hash_password(password)?;
    let mut tx = state.db_pool.begin().await?;
    sqlx::query("UPDATE users SET pwd_hash = ?, updated_at = ? WHERE id = ?")
        .bind(pwd_hash)
        .bind(Utc::now())
        .bind(reset.user_id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE password_resets SET used = 1 WHERE user_id = ?")
        .bind(reset.user_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    log::info!("Password reset completed for user {}", reset.user_id);
    Ok(())
}
