use actix_identity::Identity;
use actix_session::Session;
use actix_web::{
    get,
    http::header::CONTENT_DISPOSITION,
    post,
    web::{self, Bytes, Data},
    HttpResponse,
};
use chrono::Utc;
use serde::Deserialize;

use crate::{
    dashboard::{self, Viewer},
    db,
    errors::AppError,
    export::{self, ExportFormat},
    guards,
    structs::{InventoryRecord, Organization, PpeCategory, User},
    utils::render,
    AppState,
};

use super::page_context;

#[derive(Deserialize, Debug, Default)]
pub struct DashboardQuery {
    #[serde(default)]
    category: Option<String>,
    #[serde(default)]
    organizations: Option<Vec<String>>,
}

#[derive(Deserialize, Debug)]
pub struct DownloadQuery {
    format: Option<String>,
}

fn viewer_for(organization: Option<&Organization>) -> Viewer {
    match organization {
        None => Viewer::Unaffiliated,
        Some(o) if o.is_provider => Viewer::Provider,
        Some(_) => Viewer::Aggregator,
    }
}

async fn load_organization(
    state: &AppState,
    user: &User,
) -> Result<Option<Organization>, AppError> {
    Ok(match user.organization_id {
        Some(id) => db::get_organization_by_id(state, id).await?,
        None => None,
    })
}

#[get("/dashboard")]
pub async fn dashboard_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
    session: Session,
) -> Result<HttpResponse, AppError> {
    let member = match guards::onboarded(&state, identity).await?.resolve(&session) {
        Ok(member) => member,
        Err(redirect) => return Ok(redirect),
    };
    let mut context = page_context(&session, "Dashboard", Some(&member.user));
    context.insert("organization", &member.organization);
    context.insert("select_category_message", dashboard::SELECT_CATEGORY_MESSAGE);
    render("core/dashboard.html", &context)
}

/// Returns every dashboard view for one category as JSON.
#[post("/dashboard/data")]
pub async fn dashboard_data_handler(
    web::Json(query): web::Json<DashboardQuery>,
    state: Data<AppState>,
    identity: Option<Identity>,
    session: Session,
) -> Result<HttpResponse, AppError> {
    let user = match guards::logged_in(&state, identity).await?.resolve(&session) {
        Ok(user) => user,
        Err(redirect) => return Ok(redirect),
    };

    let category = match query.category.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => Some(
            raw.parse::<PpeCategory>()
                .map_err(AppError::BadRequest)?,
        ),
    };

    let organization = load_organization(&state, &user).await?;
    let viewer = viewer_for(organization.as_ref());
    let providers = match (&organization, viewer) {
        (Some(o), Viewer::Aggregator) => db::get_descendant_providers(&state, o.id).await?,
        _ => Vec::new(),
    };

    let rows = match (category, &organization) {
        (None, _) => Vec::new(),
        (Some(category), None) => db::get_inventory_for_user(&state, user.id, category).await?,
        (Some(category), Some(o)) if o.is_provider => {
            db::get_inventory_for_organizations(&state, &[o.id], Some(category)).await?
        }
        (Some(category), Some(_)) => {
            let selection: Vec<&str> = query
                .organizations
                .iter()
                .flatten()
                .map(|name| name.as_str())
                .collect();
            let ids: Vec<i64> = providers
                .iter()
                .filter(|p| selection.is_empty() || selection.contains(&p.name.as_str()))
                .map(|p| p.id)
                .collect();
            db::get_inventory_for_organizations(&state, &ids, Some(category)).await?
        }
    };

    let tz = user.tz();
    let today = Utc::now().with_timezone(&tz).date_naive();
    let view = dashboard::build(
        viewer,
        category,
        &rows,
        providers.into_iter().map(|p| p.name).collect(),
        tz,
        today,
    );
    Ok(HttpResponse::Ok().json(view))
}

/// Rows a member may export: their own provider's, or every descendant
/// provider's for a parent organization.
async fn export_rows(
    state: &AppState,
    organization: &Organization,
) -> Result<Vec<InventoryRecord>, AppError> {
    let ids = if organization.is_provider {
        vec![organization.id]
    } else {
        db::get_descendant_providers(state, organization.id)
            .await?
            .into_iter()
            .map(|p| p.id)
            .collect()
    };
    Ok(db::get_inventory_for_organizations(state, &ids, None).await?)
}

#[get("/dashboard/download")]
pub async fn download_handler(
    query: web::Query<DownloadQuery>,
    state: Data<AppState>,
    identity: Option<Identity>,
    session: Session,
) -> Result<HttpResponse, AppError> {
    let user = match guards::logged_in(&state, identity).await?.resolve(&session) {
        Ok(user) => user,
        Err(redirect) => return Ok(redirect),
    };
    let organization = load_organization(&state, &user).await?.ok_or(AppError::NotFound)?;
    let format: ExportFormat = query
        .format
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("Missing export format. Use csv or xlsx.".to_string()))?
        .parse()?;

    let rows = export_rows(&state, &organization).await?;
    let chunks = format.encode(&rows)?;
    let filename = export::filename(Utc::now().with_timezone(&user.tz()).date_naive(), format);
    log::info!(
        "User {} exported {} row(s) of organization {} as {}",
        user.id,
        rows.len(),
        organization.id,
        format.extension()
    );

    Ok(HttpResponse::Ok()
        .content_type(format.content_type())
        .insert_header((CONTENT_DISPOSITION, format!("attachment; filename=\"{}\"", filename)))
        .streaming(futures::stream::iter(
            chunks.into_iter().map(Ok::<Bytes, AppError>),
        )))
}
