use anyhow::{Context as _, Result, bail};
use clap::Parser;
use std::{path::PathBuf, sync::Arc};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use triage_flow::{
    AppointmentDraft, AppointmentStatus, AppointmentWorkflow, AssessmentEngine, AuthClient,
    AuthService, ChatMessage, ChatThread, Classifier, ClientConfig, DoctorReviewQueue,
    ExecutionStatus, FlowRunner, HistoryEntry, HttpBackend, InMemoryBackend, Role, Session,
    SessionStore, WorkflowBackend, build_intake_flow, intake,
    models::{AssessmentForm, parse_desired_date},
};

#[derive(Parser, Debug)]
#[command(name = "triage", about = "Symptom triage, appointments and care chat")]
struct Cli {
    /// YAML client config (base_url, timeout_secs)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overrides the configured service URL
    #[arg(long)]
    base_url: Option<String>,

    /// Use the in-process stand-in instead of a remote service
    #[arg(long)]
    offline: bool,
}

const HELP: &str = "\
commands:
  signup <patient|doctor> <email> <password> <name...>
  login <email> <password>        logout
  assess [age=N] [duration=DAYS] [allergies=..] [conditions=..] <symptoms...>
  book [YYYY-MM-DDTHH:MM] [notes...]
  ask <question...>               history
  edit <id> <text...>             rerun <id> <text...>
  delete <id> [yes]
  queue [urgent]                  report <appointment id>
  accept <id> [note...]           decline <id> [note...]
  patient <patient id>            suggest <patient id> <text...>
  help                            quit";

struct App {
    store: SessionStore,
    auth: AuthClient,
    backend: Arc<dyn WorkflowBackend>,
    queue: DoctorReviewQueue,
    runner: FlowRunner,
    chat: Option<ChatThread>,
}

impl App {
    fn new<B>(backend: Arc<B>) -> Self
    where
        B: WorkflowBackend + Classifier + AuthService + 'static,
    {
        let store = SessionStore::in_memory(intake::ASSESS);
        let engine = Arc::new(AssessmentEngine::new(backend.clone()));
        let workflow = Arc::new(AppointmentWorkflow::new(backend.clone()));
        let flow = Arc::new(build_intake_flow(engine, workflow.clone()));
        Self {
            runner: FlowRunner::new(flow, store.storage()),
            store,
            auth: AuthClient::new(backend.clone()),
            queue: DoctorReviewQueue::new(backend.clone()),
            backend,
            chat: None,
        }
    }

    async fn session(&self) -> Result<Session> {
        Ok(self.store.require().await?)
    }

    fn chat(&self) -> Result<&ChatThread> {
        self.chat.as_ref().context("not signed in")
    }

    async fn start(&mut self, identity: triage_flow::Identity) -> Result<()> {
        let role = identity.role;
        let session = self.store.sign_in(identity).await?;
        self.chat = Some(ChatThread::new(self.backend.clone(), session));
        println!("signed in as {role}");
        Ok(())
    }

    async fn run_intake(&self) -> Result<()> {
        let session = self.session().await?;
        let result = self.runner.run(&session.id).await?;
        if let Some(response) = result.response {
            println!("{response}");
        }
        if result.focus.is_some() {
            println!("(book [YYYY-MM-DDTHH:MM] [notes...] to request an appointment)");
        }
        if result.status == ExecutionStatus::Completed {
            debug!(step = %result.step_id, "Intake completed");
        }
        Ok(())
    }

    async fn dispatch(&mut self, line: &str) -> Result<bool> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Ok(true);
        };
        let args: Vec<&str> = words.collect();
        let rest = |from: usize| args.get(from..).map(|a| a.join(" ")).unwrap_or_default();

        match (command, args.as_slice()) {
            ("quit" | "exit", _) => return Ok(false),
            ("help", _) => println!("{HELP}"),

            ("signup", [role, email, password, ..]) => {
                let role = match *role {
                    "doctor" => Role::Doctor,
                    "patient" => Role::Patient,
                    other => bail!("unknown role '{other}'"),
                };
                let identity = self.auth.signup(&rest(3), email, password, role).await?;
                self.start(identity).await?;
            }
            ("login", [email, password]) => {
                let identity = self.auth.login(email, password).await?;
                self.start(identity).await?;
            }
            ("logout", _) => {
                self.store.sign_out().await?;
                self.chat = None;
                println!("signed out");
            }

            ("assess", [_, ..]) => {
                let mut session = self.session().await?;
                session.current_step = intake::ASSESS.to_string();
                intake::provide_form(&session, &parse_form(&args)?)?;
                self.store.storage().save(session).await?;
                self.run_intake().await?;
            }
            ("book", _) => {
                let session = self.session().await?;
                if session.current_step != intake::APPOINTMENT_REQUEST {
                    bail!("nothing to book: only urgent or critical assessments can request appointments");
                }
                let (desired_date, notes) = match args.first() {
                    Some(first) if looks_like_date(first) => (Some(parse_desired_date(first)?), rest(1)),
                    _ => (None, rest(0)),
                };
                intake::submit_draft(
                    &session,
                    AppointmentDraft {
                        desired_date,
                        notes,
                        submitted: true,
                    },
                )?;
                self.run_intake().await?;
            }

            ("ask", [_, ..]) => {
                let message = self.chat()?.ask(&rest(0)).await?;
                print_message(&message);
            }
            ("history", _) => {
                for message in self.chat()?.load_history().await? {
                    print_message(&message);
                }
            }
            ("edit" | "rerun", [id, _, ..]) => {
                self.chat()?.edit(id, &rest(1), command == "rerun").await?;
                println!("updated");
            }
            ("delete", [id, confirm @ ..]) => {
                let confirmed = confirm.first() == Some(&"yes");
                let deleted = self
                    .chat()?
                    .delete(id, |m| {
                        if !confirmed {
                            println!(
                                "delete \"{}\"? repeat with: delete {id} yes",
                                m.question.as_deref().unwrap_or("(note)")
                            );
                        }
                        confirmed
                    })
                    .await?;
                if deleted {
                    println!("deleted");
                }
            }

            ("queue", _) => {
                let session = self.session().await?;
                let view = self.queue.load(&session, args.first() == Some(&"urgent")).await?;
                for a in &view.appointments {
                    let marker = if view.focus.as_deref() == Some(a.id.as_str()) { "*" } else { " " };
                    println!(
                        "{marker} {} [{}] {} {} {}",
                        a.id,
                        a.severity(),
                        a.status,
                        a.patient_name.as_deref().unwrap_or(&a.patient_id),
                        a.desired_date.map(|d| d.to_string()).unwrap_or_default()
                    );
                }
                if let Some(report) = view.report {
                    println!("open: {} ({})", report.appointment_id, report.patient_label());
                }
            }
            ("report", [id]) => {
                let session = self.session().await?;
                let report = self.queue.view_report(&session, id).await?;
                println!(
                    "{} for {} <{}>: {} / {}",
                    report.appointment_id,
                    report.patient_label(),
                    report.patient_email.as_deref().unwrap_or("-"),
                    report.status,
                    report.snapshot.severity
                );
                println!("symptoms: {}", report.snapshot.form.symptoms);
                println!("advice: {}", report.snapshot.advice);
                if !report.notes.is_empty() {
                    println!("notes: {}", report.notes);
                }
            }
            ("accept" | "decline", [id, ..]) => {
                let session = self.session().await?;
                let status: AppointmentStatus = command.parse()?;
                let note = rest(1);
                self.queue
                    .decide(&session, id, status, Some(note.as_str()).filter(|n| !n.is_empty()))
                    .await?;
                println!("{id} {status}");
            }
            ("patient", [patient_id]) => {
                let session = self.session().await?;
                for entry in self.queue.view_history(&session, patient_id).await? {
                    match entry {
                        HistoryEntry::Assessment(a) => {
                            println!("{} assessment [{}] {}", a.created_at, a.severity, a.form.symptoms)
                        }
                        HistoryEntry::Message(m) => print_message(&m),
                    }
                }
            }
            ("suggest", [patient_id, _, ..]) => {
                let session = self.session().await?;
                self.queue.suggest_to_patient(&session, patient_id, &rest(1)).await?;
                println!("sent");
            }

            _ => println!("unrecognised command, try 'help'"),
        }
        Ok(true)
    }
}

/// `key=value` words fill the optional fields; everything else is symptoms.
fn parse_form(args: &[&str]) -> Result<AssessmentForm> {
    let mut form = AssessmentForm::default();
    let mut symptoms = Vec::new();
    for word in args {
        let value = |v: &str| v.replace('_', " ");
        match word.split_once('=') {
            Some(("age", v)) => form.age = value(v),
            Some(("duration", v)) => form.duration = value(v),
            Some(("allergies", v)) => form.allergies = value(v),
            Some(("conditions", v)) => form.conditions = value(v),
            _ => symptoms.push(*word),
        }
    }
    if symptoms.is_empty() {
        bail!("symptoms required");
    }
    form.symptoms = symptoms.join(" ");
    Ok(form)
}

/// `2025-03-04...`: anything else is read as notes.
fn looks_like_date(word: &str) -> bool {
    word.len() > 4
        && word.as_bytes()[..4].iter().all(u8::is_ascii_digit)
        && word.as_bytes()[4] == b'-'
}

fn print_message(m: &ChatMessage) {
    if let Some(question) = &m.question {
        println!("[{}] you: {question}", m.id);
    }
    if let Some(answer) = &m.answer {
        println!("[{}] {:?}: {answer}", m.id, m.from_role);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut app = if cli.offline {
        App::new(Arc::new(InMemoryBackend::new()))
    } else {
        let mut config = ClientConfig::load(cli.config.as_deref())?;
        if let Some(url) = cli.base_url {
            config.base_url = url;
        }
        App::new(Arc::new(HttpBackend::new(config)?))
    };

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match app.dispatch(line.trim()).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => println!("error: {e}"),
        }
    }
    Ok(())
}
