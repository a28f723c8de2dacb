//! Built-in scenarios for the agenda web app

use crate::locator::Locator;
use crate::scenario::{EmailTemplate, Evidence, Scenario, Step, UrlMatch};

pub const SIGNUP_ACTIVATION: &str = "signup-activation";
pub const AGENCY_ONBOARDING: &str = "agency-onboarding";
pub const DASHBOARD: &str = "dashboard";
pub const LOGIN_PAGE: &str = "login-page";
pub const PREMIUM_DESIGN: &str = "premium-design";
pub const LANDING_DEBUG: &str = "landing-debug";
pub const LOADING_SPINNER: &str = "loading-spinner";
pub const LOGIN_REDESIGN: &str = "login-redesign";

const PASSWORD: &str = "password123";

/// All built-in scenarios, in execution order.
pub fn builtin() -> Vec<Scenario> {
    vec![
        signup_activation(),
        agency_onboarding(),
        dashboard(),
        login_page(),
        premium_design(),
        landing_debug(),
        loading_spinner(),
        login_redesign(),
    ]
}

pub fn find(name: &str) -> Option<Scenario> {
    builtin().into_iter().find(|s| s.name == name)
}

fn scenario(name: &str, description: &str, tags: &[&str], start_path: &str) -> Scenario {
    Scenario {
        name: name.to_string(),
        description: description.to_string(),
        tags: tags.iter().map(|t| t.to_string()).collect(),
        start_path: start_path.to_string(),
        viewport: None,
        unique_email: None,
        steps: Vec::new(),
        evidence: Evidence::new(&format!("{}.png", name)),
    }
}

fn fill(target: Locator, value: &str) -> Step {
    Step::Fill {
        target,
        value: value.to_string(),
    }
}

fn click(target: Locator) -> Step {
    Step::Click {
        target,
        timeout_ms: None,
    }
}

fn wait_visible(target: Locator, timeout_ms: u64) -> Step {
    Step::WaitVisible { target, timeout_ms }
}

fn assert_visible(target: Locator) -> Step {
    Step::AssertVisible { target }
}

fn log(message: &str) -> Step {
    Step::Log {
        message: message.to_string(),
    }
}

/// Sign up a new user, wait for the pending-approval screen, activate the
/// account out of band and wait for the dashboard to appear.
pub fn signup_activation() -> Scenario {
    let mut s = scenario(
        SIGNUP_ACTIVATION,
        "Sign up, activate through the helper, land on the dashboard",
        &["auth", "activation"],
        "/login",
    );
    s.unique_email = Some(EmailTemplate::new("testuser_", "agendatransfer.com"));
    s.evidence = Evidence::new("dashboard_verification.png");
    s.steps = vec![
        log("Attempting to sign up with new user: {email}"),
        click(Locator::button("Não tem conta? Cadastre-se")),
        assert_visible(Locator::heading("Criar Conta")),
        fill(Locator::label("Nome Completo"), "Test User"),
        fill(Locator::label("Telefone"), "(11) 98765-4321"),
        fill(Locator::label("Email"), "{email}"),
        fill(Locator::label("Senha"), PASSWORD),
        click(Locator::button("Criar Conta")),
        wait_visible(Locator::heading("Conta Pendente"), 15_000),
        log("Reached pending approval page"),
        Step::Activate {
            email: "{email}".to_string(),
        },
        wait_visible(Locator::heading("Dashboard"), 20_000),
    ];
    s
}

/// Register an agency with a fresh login and land on the agency portal.
pub fn agency_onboarding() -> Scenario {
    let mut s = scenario(
        AGENCY_ONBOARDING,
        "Register an agency and land on the agency portal",
        &["agency", "onboarding"],
        "/cadastro-agencia",
    );
    s.unique_email = Some(EmailTemplate::new("test-agency-", "example.com"));
    s.evidence = Evidence::new("agency_onboarding_success.png");
    s.steps = vec![
        fill(Locator::label("Nome da Agência *"), "Agência de Teste Playwright"),
        fill(Locator::label("CNPJ"), "00.000.000/0001-00"),
        fill(Locator::label("Endereço"), "Rua dos Testes, 123"),
        fill(Locator::label("Pessoa de Contato"), "Teste da Silva"),
        fill(Locator::label("Telefone da Agência"), "(99) 99999-9999"),
        fill(Locator::label("E-mail da Agência"), "contato@agenciadeteste.com"),
        fill(Locator::label("Seu Nome Completo *"), "Usuário de Teste"),
        fill(Locator::label("Seu Telefone"), "(88) 88888-8888"),
        fill(Locator::label("Seu E-mail (para login) *"), "{email}"),
        fill(Locator::exact_label("Senha *"), PASSWORD),
        fill(Locator::label("Confirmar Senha *"), PASSWORD),
        click(Locator::button("Finalizar Cadastro")),
        Step::WaitUrl {
            url: UrlMatch::Exact("/agency-portal".to_string()),
            timeout_ms: 10_000,
        },
        assert_visible(Locator::heading("Bem-vindo ao Portal da Agência")),
    ];
    s
}

pub fn dashboard() -> Scenario {
    let mut s = scenario(DASHBOARD, "Dashboard renders its summary cards", &["smoke"], "/");
    s.steps = vec![
        wait_visible(Locator::heading("Dashboard"), 15_000),
        assert_visible(Locator::text("Motoristas Disponíveis")),
    ];
    s
}

pub fn login_page() -> Scenario {
    let mut s = scenario(LOGIN_PAGE, "Login page heading", &["smoke", "visual"], "/");
    s.evidence = Evidence::new("login_page_for_tabs_change.png");
    s.steps = vec![wait_visible(
        Locator::css(r#"h1:has-text("Acesse sua conta")"#),
        30_000,
    )];
    s
}

pub fn premium_design() -> Scenario {
    let mut s = scenario(
        PREMIUM_DESIGN,
        "Full-page capture of the login page once entry animations finish",
        &["visual"],
        "/",
    );
    s.evidence = Evidence::new("premium_design_verification.png").full_page();
    s.steps = vec![
        wait_visible(Locator::placeholder("voce@exemplo.com"), 15_000),
        Step::Settle { timeout_ms: 5_000 },
    ];
    s
}

/// Captures whatever the landing page renders, even an error screen.
pub fn landing_debug() -> Scenario {
    let mut s = scenario(
        LANDING_DEBUG,
        "Diagnostic capture of the landing page after it settles",
        &["debug"],
        "/",
    );
    s.evidence = Evidence::new("debug_screenshot.png").full_page();
    s.steps = vec![Step::Settle { timeout_ms: 10_000 }];
    s
}

pub fn loading_spinner() -> Scenario {
    let mut s = scenario(
        LOADING_SPINNER,
        "Initial loading spinner is shown",
        &["visual"],
        "/",
    );
    s.steps = vec![wait_visible(Locator::css(r#"div[role="status"]"#), 30_000)];
    s
}

pub fn login_redesign() -> Scenario {
    let mut s = scenario(
        LOGIN_REDESIGN,
        "Redesigned login page shows the form and availability calendar",
        &["visual"],
        "/",
    );
    s.evidence = Evidence::new("login-redesign-check.png").full_page();
    s.steps = vec![
        wait_visible(Locator::css(r#"h1:has-text("TourManager")"#), 10_000),
        assert_visible(Locator::css("form")),
        assert_visible(Locator::css(r#"h2:has-text("Disponibilidades")"#)),
    ];
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_builtin_scenarios_are_valid() {
        for s in builtin() {
            s.validate().unwrap_or_else(|e| panic!("{} invalid: {}", s.name, e));
        }
    }

    #[test]
    fn test_builtin_names_and_evidence_are_unique() {
        let all = builtin();
        let names: HashSet<_> = all.iter().map(|s| s.name.clone()).collect();
        let paths: HashSet<_> = all.iter().map(|s| s.evidence.path.clone()).collect();
        assert_eq!(names.len(), all.len());
        assert_eq!(paths.len(), all.len());
    }

    #[test]
    fn test_find() {
        assert!(find(DASHBOARD).is_some());
        assert!(find("nope").is_none());
    }

    #[test]
    fn test_unique_email_scenarios_use_placeholder() {
        let signup = signup_activation();
        let resolved = signup.with_email(Some("testuser_1@agendatransfer.com"));
        assert!(resolved
            .steps
            .contains(&Step::Activate { email: "testuser_1@agendatransfer.com".into() }));

        let agency = agency_onboarding().with_email(Some("test-agency-1@example.com"));
        assert!(agency.steps.contains(&Step::Fill {
            target: Locator::label("Seu E-mail (para login) *"),
            value: "test-agency-1@example.com".into(),
        }));
    }
}
