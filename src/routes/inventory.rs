use actix_identity::Identity;
use actix_session::Session;
use actix_web::{
    get, post,
    web::{self, Data},
    HttpResponse,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::{
    db,
    errors::AppError,
    flash::{self, FlashMessage},
    forms::{FormErrors, FormsetErrors, RowInput, TrackFormset},
    guards::{self, Member, HOME_PATH},
    structs::{InventoryRecord, PpeCategory, PpeType, QuantityRule},
    utils::{render, see_other},
    AppState,
};

use super::page_context;

const PAGE_SIZE: i64 = 15;
const RECENT_ITEMS: i64 = 5;

#[derive(Deserialize, Debug)]
pub struct PageQuery {
    page: Option<String>,
}

/// Clamps a requested page: anything unparsable is page 1, anything out of
/// range is the last page.
fn resolve_page(requested: Option<&str>, total_items: i64) -> (i64, i64) {
    let last = ((total_items + PAGE_SIZE - 1) / PAGE_SIZE).max(1);
    let page = match requested.map(|p| p.trim().parse::<i64>()) {
        None | Some(Err(_)) => 1,
        Some(Ok(p)) if p < 1 || p > last => last,
        Some(Ok(p)) => p,
    };
    (page, last)
}

/// An inventory row with its timestamp already in the viewer's timezone.
#[derive(Serialize)]
struct InventoryRow<'a> {
    record: &'a InventoryRecord,
    category: &'static str,
    submitted: String,
    projected_run_out: String,
    daily_use: String,
    projected_daily_use: String,
}

fn display_rows(records: &[InventoryRecord], tz: Tz) -> Vec<InventoryRow<'_>> {
    let optional = |v: Option<i64>| v.map(|v| v.to_string()).unwrap_or_default();
    records
        .iter()
        .map(|record| InventoryRow {
            record,
            category: record.item_type.label(),
            submitted: record
                .timestamp
                .with_timezone(&tz)
                .format("%Y-%m-%d %H:%M")
                .to_string(),
            projected_run_out: record
                .projected_run_out
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_default(),
            daily_use: optional(record.daily_use),
            projected_daily_use: optional(record.projected_daily_use),
        })
        .collect()
}

#[get("/home/inventory")]
pub async fn inventory_list_handler(
    query: web::Query<PageQuery>,
    state: Data<AppState>,
    identity: Option<Identity>,
    session: Session,
) -> Result<HttpResponse, AppError> {
    let access = guards::onboarded(&state, identity).await?;
    let Member { user, organization } = match access.resolve(&session) {
        Ok(member) => member,
        Err(redirect) => return Ok(redirect),
    };

    let total = db::count_inventory(&state, organization.id).await?;
    let (page, last) = resolve_page(query.page.as_deref(), total);
    let offset = (page - 1) * PAGE_SIZE;
    let records = db::get_inventory_page(&state, organization.id, PAGE_SIZE, offset).await?;

    let mut context = page_context(&session, "Inventory", Some(&user));
    context.insert("organization", &organization);
    context.insert("items", &display_rows(&records, user.tz()));
    context.insert("page", &page);
    context.insert("num_pages", &last);
    context.insert("total", &total);
    context.insert("has_previous", &(page > 1));
    context.insert("has_next", &(page < last));
    context.insert("timezone", user.tz().name());
    render("core/inventory_list.html", &context)
}

#[derive(Serialize)]
struct Choice {
    value: String,
    label: String,
}

#[derive(Serialize)]
struct RowView<'a> {
    index: usize,
    input: &'a RowInput,
    errors: &'a FormErrors,
}

#[derive(Serialize)]
struct ContainerField {
    field: &'static str,
    label: &'static str,
}

fn category_from_path(slug: &str) -> Result<PpeCategory, AppError> {
    PpeCategory::from_slug(slug).ok_or(AppError::NotFound)
}

/// Only members of provider organizations submit inventory.
fn require_provider(member: Member) -> Result<Member, AppError> {
    if member.organization.is_provider {
        Ok(member)
    } else {
        log::warn!(
            "User {} of parent organization {} tried to submit inventory",
            member.user.id,
            member.organization.id
        );
        Err(AppError::Forbidden)
    }
}

async fn render_track(
    state: &AppState,
    session: &Session,
    member: &Member,
    formset: &TrackFormset,
    errors: &FormsetErrors,
    choices: &[PpeType],
) -> Result<HttpResponse, AppError> {
    let category = formset.category;
    let recent =
        db::get_recent_inventory(state, member.organization.id, category, RECENT_ITEMS).await?;
    let no_errors = FormErrors::default();
    let rows: Vec<RowView<'_>> = formset
        .rows
        .iter()
        .enumerate()
        .map(|(index, input)| RowView {
            index,
            input,
            errors: errors.rows.get(index).unwrap_or(&no_errors),
        })
        .collect();
    let container = match category.quantity_rule() {
        QuantityRule::PerContainer { field, label } => Some(ContainerField { field, label }),
        QuantityRule::Direct => None,
    };

    let title = format!("Track {}", category.label());
    let mut context = page_context(session, &title, Some(&member.user));
    context.insert("category_label", category.label());
    context.insert("category_slug", category.slug());
    context.insert("count_label", category.count_label());
    context.insert("container", &container);
    context.insert(
        "choices",
        &choices
            .iter()
            .map(|p| Choice {
                value: p.id.to_string(),
                label: p.to_string(),
            })
            .collect::<Vec<_>>(),
    );
    context.insert("rows", &rows);
    context.insert("total_forms", &formset.rows.len());
    context.insert("non_form_errors", &errors.non_form);
    context.insert("recent", &display_rows(&recent, member.user.tz()));
    render("core/track_inventory.html", &context)
}

#[get("/track/{category}")]
pub async fn track_handler(
    path: web::Path<String>,
    state: Data<AppState>,
    identity: Option<Identity>,
    session: Session,
) -> Result<HttpResponse, AppError> {
    let category = category_from_path(&path)?;
    let member = match guards::onboarded(&state, identity).await?.resolve(&session) {
        Ok(member) => require_provider(member)?,
        Err(redirect) => return Ok(redirect),
    };
    let choices = db::get_ppe_types(&state, category).await?;
    render_track(
        &state,
        &session,
        &member,
        &TrackFormset::empty(category),
        &FormsetErrors::default(),
        &choices,
    )
    .await
}

#[post("/track/{category}")]
pub async fn track_form_handler(
    path: web::Path<String>,
    web::Form(pairs): web::Form<Vec<(String, String)>>,
    state: Data<AppState>,
    identity: Option<Identity>,
    session: Session,
) -> Result<HttpResponse, AppError> {
    let category = category_from_path(&path)?;
    let member = match guards::onboarded(&state, identity).await?.resolve(&session) {
        Ok(member) => require_provider(member)?,
        Err(redirect) => return Ok(redirect),
    };

    let choices = db::get_ppe_types(&state, category).await?;
    let formset = TrackFormset::from_pairs(category, &pairs);
    let rows = match formset.validate(&choices) {
        Ok(rows) => rows,
        Err(errors) => {
            return render_track(&state, &session, &member, &formset, &errors, &choices).await
        }
    };

    db::insert_inventories(&state, member.user.id, member.organization.id, &rows).await?;
    flash::push(
        &session,
        FlashMessage::success(format!(
            "You have submitted an update for {} different type(s) of {}",
            rows.len(),
            category.label()
        )),
    )?;
    Ok(see_other(HOME_PATH))
}

#[cfg(test)]
mod paging_tests {
    use super::resolve_page;

    #[test]
    fn test_resolve_page_clamps() {
        assert_eq!(resolve_page(None, 40), (1, 3));
        assert_eq!(resolve_page(Some("abc"), 40), (1, 3));
        assert_eq!(resolve_page(Some("2"), 40), (2, 3));
        assert_eq!(resolve_page(Some("9"), 40), (3, 3));
        assert_eq!(resolve_page(Some("0"), 40), (3, 3));
        assert_eq!(resolve_page(Some("1"), 0), (1, 1));
        assert_eq!(resolve_page(Some("2"), 15), (1, 1));
    }
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test};

    use super::*;
    use crate::test_support::*;

    #[actix_web::test]
    async fn test_gloves_post_persists_units_times_boxes() {
        let state = test_state().await;
        let app = test::init_service(test_app!(state)).await;
        let user = create_test_user(&state, "nurse").await;
        let organization = db::create_organization_for_user(&state, user.id, "Mercy", true, None)
            .await
            .unwrap();
        let gloves = db::get_ppe_types(&state, PpeCategory::Gloves).await.unwrap();
        let cookie = login!(app, &user.username);

        let req = test::TestRequest::post()
            .uri("/track/gloves")
            .cookie(cookie)
            .set_form([
                ("form-TOTAL_FORMS", "2".to_string()),
                ("form-0-ppetype", gloves[0].id.to_string()),
                ("form-0-number", "12".to_string()),
                ("form-0-box_count", "3".to_string()),
                ("form-1-ppetype", String::new()),
            ])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), "/home");

        let saved = db::get_inventory_for_organizations(&state, &[organization.id], None)
            .await
            .unwrap();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].number, 36);
        assert_eq!(saved[0].user_id, user.id);
    }

    #[actix_web::test]
    async fn test_invalid_formset_saves_nothing() {
        let state = test_state().await;
        let app = test::init_service(test_app!(state)).await;
        let user = create_test_user(&state, "nurse").await;
        let organization = db::create_organization_for_user(&state, user.id, "Mercy", true, None)
            .await
            .unwrap();
        let masks = db::get_ppe_types(&state, PpeCategory::N95Mask).await.unwrap();
        let cookie = login!(app, &user.username);

        let req = test::TestRequest::post()
            .uri("/track/n95-masks")
            .cookie(cookie)
            .set_form([
                ("form-TOTAL_FORMS", "2".to_string()),
                ("form-0-ppetype", masks[0].id.to_string()),
                ("form-0-number", "10".to_string()),
                ("form-1-ppetype", masks[0].id.to_string()),
                ("form-1-number", "-4".to_string()),
            ])
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        assert_eq!(db::count_inventory(&state, organization.id).await.unwrap(), 0);
    }

    #[actix_web::test]
    async fn test_unknown_category_is_not_found() {
        let state = test_state().await;
        let app = test::init_service(test_app!(state)).await;
        let user = create_test_user(&state, "nurse").await;
        db::create_organization_for_user(&state, user.id, "Mercy", true, None)
            .await
            .unwrap();
        let cookie = login!(app, &user.username);

        let req = test::TestRequest::get().uri("/track/masks").cookie(cookie).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_track_requires_onboarding() {
        let state = test_state().await;
        let app = test::init_service(test_app!(state)).await;
        let user = create_test_user(&state, "nurse").await;
        let cookie = login!(app, &user.username);

        for uri in ["/track/gloves", "/home/inventory", "/dashboard"] {
            let req = test::TestRequest::get().uri(uri).cookie(cookie.clone()).to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::SEE_OTHER, "{}", uri);
            assert_eq!(location(&resp), "/home/onboard");
        }
    }

    #[actix_web::test]
    async fn test_parent_organizations_cannot_submit() {
        let state = test_state().await;
        let app = test::init_service(test_app!(state)).await;
        let user = create_test_user(&state, "admin").await;
        db::create_organization_for_user(&state, user.id, "County", false, None)
            .await
            .unwrap();
        let cookie = login!(app, &user.username);

        let req = test::TestRequest::get().uri("/track/gowns").cookie(cookie).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
