use actix_identity::Identity;
use actix_session::Session;
use actix_web::{
    get, post,
    web::{self, Data},
    HttpResponse,
};
use tera::Context;

use crate::{
    db,
    errors::AppError,
    flash::{self, FlashMessage},
    forms::{ConnectForm, FormErrors, OrganizationForm, INVALID_CODE},
    guards::{self, HOME_PATH},
    mailer::OutgoingMail,
    structs::User,
    utils::{render, see_other},
    AppState,
};

use super::page_context;

/// Which kind of organization an onboarding form creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NewOrganization {
    Provider,
    Parent,
}

impl NewOrganization {
    fn is_provider(self) -> bool {
        self == NewOrganization::Provider
    }

    fn title(self) -> &'static str {
        match self {
            NewOrganization::Provider => "Create a new provider organization",
            NewOrganization::Parent => "Create a new parent organization",
        }
    }

    fn action(self) -> &'static str {
        match self {
            NewOrganization::Provider => "/home/onboard/new-provider",
            NewOrganization::Parent => "/home/onboard/new-parent",
        }
    }

    fn email_template(self) -> &'static str {
        match self {
            NewOrganization::Provider => "provider_organization_code.txt",
            NewOrganization::Parent => "parent_organization_code.txt",
        }
    }
}

#[get("/home")]
pub async fn home_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
    session: Session,
) -> Result<HttpResponse, AppError> {
    let member = match guards::onboarded(&state, identity).await?.resolve(&session) {
        Ok(member) => member,
        Err(redirect) => return Ok(redirect),
    };

    let mut context = page_context(&session, "Home", Some(&member.user));
    context.insert("organization", &member.organization);
    context.insert(
        "role",
        if member.organization.is_provider {
            "Provider"
        } else {
            "Parent organization"
        },
    );
    render("core/home.html", &context)
}

#[get("/home/onboard")]
pub async fn onboard_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
    session: Session,
) -> Result<HttpResponse, AppError> {
    let user = match guards::onboard_pending(&state, identity).await?.resolve(&session) {
        Ok(user) => user,
        Err(redirect) => return Ok(redirect),
    };
    let context = page_context(&session, "Get started", Some(&user));
    render("core/onboard.html", &context)
}

fn render_connect(
    session: &Session,
    user: &User,
    form: &ConnectForm,
    errors: &FormErrors,
) -> Result<HttpResponse, AppError> {
    let mut context = page_context(session, "Join an organization", Some(user));
    context.insert("form", form);
    context.insert("errors", errors);
    render("core/onboard_connect.html", &context)
}

#[get("/home/onboard/connect")]
pub async fn connect_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
    session: Session,
) -> Result<HttpResponse, AppError> {
    let user = match guards::onboard_pending(&state, identity).await?.resolve(&session) {
        Ok(user) => user,
        Err(redirect) => return Ok(redirect),
    };
    render_connect(&session, &user, &ConnectForm::default(), &FormErrors::default())
}

#[post("/home/onboard/connect")]
pub async fn connect_form_handler(
    web::Form(form): web::Form<ConnectForm>,
    state: Data<AppState>,
    identity: Option<Identity>,
    session: Session,
) -> Result<HttpResponse, AppError> {
    let user = match guards::onboard_pending(&state, identity).await?.resolve(&session) {
        Ok(user) => user,
        Err(redirect) => return Ok(redirect),
    };

    let code = match form.normalized_code() {
        Ok(code) => code,
        Err(errors) => return render_connect(&session, &user, &form, &errors),
    };
    let Some(organization) = db::get_organization_by_code(&state, &code).await? else {
        log::warn!("User {} tried an unknown invite code", user.id);
        let mut errors = FormErrors::default();
        errors.add("organization_code", INVALID_CODE);
        return render_connect(&session, &user, &form, &errors);
    };

    db::join_organization(&state, user.id, organization.id).await?;
    flash::push(
        &session,
        FlashMessage::success(format!(
            "Thank you for joining {}. You can now submit inventory on its behalf.",
            organization.name
        )),
    )?;
    Ok(see_other(HOME_PATH))
}

fn render_new_organization(
    session: &Session,
    user: &User,
    kind: NewOrganization,
    form: &OrganizationForm,
    errors: &FormErrors,
) -> Result<HttpResponse, AppError> {
    let mut context = page_context(session, kind.title(), Some(user));
    context.insert("action", kind.action());
    context.insert("is_provider", &kind.is_provider());
    context.insert("form", form);
    context.insert("errors", errors);
    render("core/onboard_form.html", &context)
}

async fn show_new_organization(
    kind: NewOrganization,
    state: &AppState,
    identity: Option<Identity>,
    session: &Session,
) -> Result<HttpResponse, AppError> {
    let user = match guards::onboard_pending(state, identity).await?.resolve(session) {
        Ok(user) => user,
        Err(redirect) => return Ok(redirect),
    };
    render_new_organization(
        session,
        &user,
        kind,
        &OrganizationForm::default(),
        &FormErrors::default(),
    )
}

/// Validates, creates the organization with the user as its first member and
/// mails them the invite code.
async fn create_new_organization(
    kind: NewOrganization,
    form: OrganizationForm,
    state: &AppState,
    identity: Option<Identity>,
    session: &Session,
) -> Result<HttpResponse, AppError> {
    let user = match guards::onboard_pending(state, identity).await?.resolve(session) {
        Ok(user) => user,
        Err(redirect) => return Ok(redirect),
    };

    let mut errors = form.validate();
    let name = form.name.trim().to_string();
    if !errors.has("name") && db::organization_name_taken(state, &name).await? {
        errors.add("name", "Organization with this Name already exists.");
    }

    let mut parent_id = None;
    if let Some(parent_code) = form.parent_code() {
        match db::get_organization_by_code(state, &parent_code).await? {
            Some(parent) if !parent.is_provider => parent_id = Some(parent.id),
            Some(_) => errors.add("parent_code", "Providers cannot have member organizations."),
            None => errors.add("parent_code", INVALID_CODE),
        }
    }

    if !errors.is_empty() {
        return render_new_organization(session, &user, kind, &form, &errors);
    }

    let organization = db::create_organization_for_user(
        state,
        user.id,
        &name,
        kind.is_provider(),
        parent_id,
    )
    .await?;

    let mut context = Context::new();
    context.insert("user", &user);
    context.insert("organization", &organization);
    context.insert("site_url", &state.site_url);
    let mail = OutgoingMail::from_template(
        &user.email,
        "[PPETrackr] Your organization code",
        kind.email_template(),
        &context,
    )?;
    if let Err(e) = state.mailer.send(mail).await {
        log::error!("Failed to send organization code for {}: {}", organization.id, e);
    }

    flash::push(
        session,
        FlashMessage::success(format!(
            "{} has been created. We have emailed you its invite code.",
            organization.name
        )),
    )?;
    Ok(see_other(HOME_PATH))
}

#[get("/home/onboard/new-provider")]
pub async fn new_provider_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
    session: Session,
) -> Result<HttpResponse, AppError> {
    show_new_organization(NewOrganization::Provider, &state, identity, &session).await
}

#[post("/home/onboard/new-provider")]
pub async fn new_provider_form_handler(
    web::Form(form): web::Form<OrganizationForm>,
    state: Data<AppState>,
    identity: Option<Identity>,
    session: Session,
) -> Result<HttpResponse, AppError> {
    create_new_organization(NewOrganization::Provider, form, &state, identity, &session).await
}

#[get("/home/onboard/new-parent")]
pub async fn new_parent_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
    session: Session,
) -> Result<HttpResponse, AppError> {
    show_new_organization(NewOrganization::Parent, &state, identity, &session).await
}

#[post("/home/onboard/new-parent")]
pub async fn new_parent_form_handler(
    web::Form(form): web::Form<OrganizationForm>,
    state: Data<AppState>,
    identity: Option<Identity>,
    session: Session,
) -> Result<HttpResponse, AppError> {
    create_new_organization(NewOrganization::Parent, form, &state, identity, &session).await
}
