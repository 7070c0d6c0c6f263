use actix_identity::Identity;
use actix_session::Session;
use actix_web::{
    get, post,
    web::{self, Data},
    HttpMessage, HttpRequest, HttpResponse, Responder,
};
use tera::Context;

use crate::{
    db::{self, NewUser},
    errors::AppError,
    flash::{self, FlashMessage},
    forms::{FormErrors, LoginForm, PasswordResetForm, RegisterForm, SetPasswordForm},
    guards::{self, HOME_PATH, ONBOARD_PATH},
    mailer::OutgoingMail,
    utils::{render, see_other, verify_password},
    AppState,
};

use super::page_context;

fn timezone_choices() -> Vec<&'static str> {
    chrono_tz::TZ_VARIANTS.iter().map(|tz| tz.name()).collect()
}

#[get("/")]
pub async fn index_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
    session: Session,
) -> Result<impl Responder, AppError> {
    let user = guards::current_user(&state, identity).await?;
    let mut context = page_context(&session, "PPE-Trackr", user.as_ref());
    context.insert("description", "Track protective equipment across your organization");
    render("index.html", &context)
}

fn render_register(
    session: &Session,
    form: &RegisterForm,
    errors: &FormErrors,
) -> Result<HttpResponse, AppError> {
    let mut context = page_context(session, "Register", None);
    context.insert("form", form);
    context.insert("errors", errors);
    context.insert("timezones", &timezone_choices());
    render("registration/register.html", &context)
}

/// Register handler
#[get("/register")]
pub async fn register_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
    session: Session,
) -> Result<HttpResponse, AppError> {
    if guards::current_user(&state, identity).await?.is_some() {
        return Ok(see_other(HOME_PATH));
    }
    let form = RegisterForm {
        timezone: "UTC".to_string(),
        ..RegisterForm::default()
    };
    render_register(&session, &form, &FormErrors::default())
}

/// Register Form handler
#[post("/register")]
pub async fn register_form_handler(
    web::Form(form): web::Form<RegisterForm>,
    state: Data<AppState>,
    session: Session,
    request: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let mut errors = form.validate();
    let username = form.username.trim().to_string();
    let email = form.email.trim().to_lowercase();

    if !errors.has("username") && db::username_taken(&state, &username).await? {
        errors.add("username", "A user with that username already exists.");
    }
    if !errors.has("email") && db::email_taken(&state, &email).await? {
        errors.add("email", "User with this email address already exists.");
    }
    if !errors.is_empty() {
        return render_register(&session, &form, &errors);
    }

    let user = db::create_user(
        &state,
        NewUser {
            username,
            email,
            first_name: form.first_name.trim().to_string(),
            last_name: form.last_name.trim().to_string(),
            password: form.password1.clone(),
            timezone: form.timezone.clone(),
        },
    )
    .await?;

    Identity::login(&request.extensions(), user.id.to_string())
        .map_err(|e| AppError::IdentityError(e.to_string()))?;
    flash::push(
        &session,
        FlashMessage::info(format!(
            "Welcome, {}! Join or register your organization to get started.",
            user.username
        )),
    )?;

    Ok(see_other(ONBOARD_PATH))
}

fn render_login(
    session: &Session,
    username: &str,
    errors: &FormErrors,
) -> Result<HttpResponse, AppError> {
    let mut context = page_context(session, "Log in", None);
    context.insert("username", username);
    context.insert("errors", errors);
    render("registration/login.html", &context)
}

#[get("/login")]
pub async fn login_handler(
    state: Data<AppState>,
    identity: Option<Identity>,
    session: Session,
) -> Result<HttpResponse, AppError> {
    if guards::current_user(&state, identity).await?.is_some() {
        return Ok(see_other(HOME_PATH));
    }
    render_login(&session, "", &FormErrors::default())
}

#[post("/login")]
pub async fn login_form_handler(
    web::Form(form): web::Form<LoginForm>,
    state: Data<AppState>,
    session: Session,
    request: HttpRequest,
) -> Result<HttpResponse, AppError> {
    let login = form.username.trim();
    let mut errors = FormErrors::default();
    if login.is_empty() || form.password.is_empty() {
        errors.add_non_field("Please enter your username and password.");
        return render_login(&session, login, &errors);
    }

    match db::find_user_by_login(&state, login).await? {
        Some(user) if verify_password(&form.password, &user.pwd_hash) => {
            Identity::login(&request.extensions(), user.id.to_string())
                .map_err(|e| AppError::IdentityError(e.to_string()))?;
            log::info!("User {} logged in", user.id);
            Ok(see_other(HOME_PATH))
        }
        _ => {
            log::warn!("Failed login attempt for {}", login);
            errors.add_non_field(
                "Please enter a correct username and password. Note that both fields may be case-sensitive.",
            );
            render_login(&session, login, &errors)
        }
    }
}

#[get("/logout")]
pub async fn logout_handler(identity: Option<Identity>) -> impl Responder {
    if let Some(identity) = identity {
        identity.logout();
    }
    see_other("/")
}

fn render_reset_request(
    session: &Session,
    form: &PasswordResetForm,
    errors: &FormErrors,
) -> Result<HttpResponse, AppError> {
    let mut context = page_context(session, "Password reset", None);
    context.insert("form", form);
    context.insert("errors", errors);
    render("registration/password_reset_form.html", &context)
}

#[get("/password-reset")]
pub async fn password_reset_handler(session: Session) -> Result<HttpResponse, AppError> {
    render_reset_request(&session, &PasswordResetForm::default(), &FormErrors::default())
}

/// Sends a reset link when the address is known; the response never reveals
/// whether it was.
#[post("/password-reset")]
pub async fn password_reset_form_handler(
    web::Form(form): web::Form<PasswordResetForm>,
    state: Data<AppState>,
    session: Session,
) -> Result<HttpResponse, AppError> {
    let email = form.email.trim();
    if !email.contains('@') {
        let mut errors = FormErrors::default();
        errors.add("email", "Enter a valid email address.");
        return render_reset_request(&session, &form, &errors);
    }

    if let Some(user) = db::find_user_by_email(&state, email).await? {
        let reset = db::create_password_reset(&state, user.id).await?;
        let mut context = Context::new();
        context.insert("user", &user);
        context.insert(
            "reset_url",
            &format!("{}/password-reset/{}/{}", state.site_url, user.id, reset.token),
        );
        let mail = OutgoingMail::from_template(
            &user.email,
            "[PPETrackr] Password reset",
            "password_reset.txt",
            &context,
        )?;
        if let Err(e) = state.mailer.send(mail).await {
            log::error!("Failed to send password reset mail to user {}: {}", user.id, e);
        }
    }

    Ok(see_other("/password-reset/done"))
}

#[get("/password-reset/done")]
pub async fn password_reset_done_handler(session: Session) -> Result<HttpResponse, AppError> {
    let context = page_context(&session, "Password reset sent", None);
    render("registration/password_reset_done.html", &context)
}

#[get("/password-reset/complete")]
pub async fn password_reset_complete_handler(session: Session) -> Result<HttpResponse, AppError> {
    let context = page_context(&session, "Password reset complete", None);
    render("registration/password_reset_complete.html", &context)
}

fn render_reset_confirm(
    session: &Session,
    valid_link: bool,
    errors: &FormErrors,
) -> Result<HttpResponse, AppError> {
    let mut context = page_context(session, "Enter new password", None);
    context.insert("validlink", &valid_link);
    context.insert("errors", errors);
    render("registration/password_reset_confirm.html", &context)
}

#[get("/password-reset/{uid}/{token}")]
pub async fn password_reset_confirm_handler(
    path: web::Path<(i64, String)>,
    state: Data<AppState>,
    session: Session,
) -> Result<HttpResponse, AppError> {
    let (uid, token) = path.into_inner();
    let reset = db::find_valid_password_reset(&state, uid, &token).await?;
    render_reset_confirm(&session, reset.is_some(), &FormErrors::default())
}

#[post("/password-reset/{uid}/{token}")]
pub async fn password_reset_confirm_form_handler(
    path: web::Path<(i64, String)>,
    web::Form(form): web::Form<SetPasswordForm>,
    state: Data<AppState>,
    session: Session,
) -> Result<HttpResponse, AppError> {
    let (uid, token) = path.into_inner();
    let Some(reset) = db::find_valid_password_reset(&state, uid, &token).await? else {
        return render_reset_confirm(&session, false, &FormErrors::default());
    };

    let errors = form.validate();
    if !errors.is_empty() {
        return render_reset_confirm(&session, true, &errors);
    }

    db::complete_password_reset(&state, &reset, &form.password1).await?;
    Ok(see_other("/password-reset/complete"))
}
