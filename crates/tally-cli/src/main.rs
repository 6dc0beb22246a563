//! `tally`, the command-line client for the Tally survey server.
//!
//! # Usage
//!
//! ```text
//! tally --url http://localhost:5232 list
//! tally create --title "Lunch Poll" \
//!   --respondent "Alice <alice@x.com>" --question "Pizza or tacos?"
//! tally respond 1 --respondent-id 1 --answer 1=tacos
//! tally publish 1 --respondent 1 --question 1
//! ```

mod client;

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use client::{ApiClient, ApiConfig};
use serde::{Deserialize, Serialize};
use tally_core::{
  authoring::{Answer, RespondentChoice, RespondentDraft, Submission, SurveyDraft},
  model::{QuestionId, RespondentId, SurveyId},
};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

const DEFAULT_URL: &str = "http://localhost:5232";

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "tally", about = "Command-line client for the Tally survey server")]
struct Args {
  /// Path to a TOML config file (url).
  #[arg(short, long, value_name = "FILE")]
  config: Option<PathBuf>,

  /// Base URL of the tally server (default: http://localhost:5232).
  #[arg(long, env = "TALLY_URL")]
  url: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// List every survey.
  List,

  /// Show a survey with its respondents, questions and responses.
  Show { id: i64 },

  /// Create a survey.
  Create {
    #[arg(long)]
    title: String,

    /// A respondent as `"Name <email>"`; repeatable.
    #[arg(long = "respondent", value_parser = parse_respondent, required = true)]
    respondents: Vec<RespondentDraft>,

    /// Question text; repeatable.
    #[arg(long = "question", required = true)]
    questions: Vec<String>,
  },

  /// Delete a survey with its links, responses and published assignments.
  Delete { id: i64 },

  /// Add a respondent to a survey.
  AddRespondent {
    survey: i64,
    #[arg(long)]
    name: String,
    #[arg(long)]
    email: String,
  },

  /// Add a question to a survey.
  AddQuestion {
    survey: i64,
    #[arg(long)]
    text: String,
  },

  /// Unlink a respondent from a survey and drop their answers to it.
  RemoveRespondent { survey: i64, respondent: i64 },

  /// Unlink a question from a survey and drop its answers.
  RemoveQuestion { survey: i64, question: i64 },

  /// Submit answers to a survey.
  Respond {
    survey: i64,

    /// Answer as an existing respondent of the survey.
    #[arg(long, conflicts_with_all = ["name", "email"])]
    respondent_id: Option<i64>,

    /// Name of a new respondent (with --email).
    #[arg(long)]
    name: Option<String>,

    /// Email of a new respondent (with --name).
    #[arg(long)]
    email: Option<String>,

    /// An answer as `QUESTION_ID=TEXT`; repeatable.
    #[arg(long = "answer", value_parser = parse_answer, required = true)]
    answers: Vec<Answer>,
  },

  /// Assign questions to respondents.
  Publish {
    survey: i64,
    #[arg(long = "respondent", required = true)]
    respondents: Vec<i64>,
    #[arg(long = "question", required = true)]
    questions: Vec<i64>,
  },

  /// Remove every published assignment of a survey.
  Unpublish { survey: i64 },

  /// Show published surveys, or one survey's published view.
  Published { survey: Option<i64> },
}

// ─── Argument parsers ─────────────────────────────────────────────────────────

/// Parse `"Name <email>"`.
fn parse_respondent(s: &str) -> Result<RespondentDraft, String> {
  let (name, rest) = s
    .split_once('<')
    .ok_or_else(|| format!("expected \"Name <email>\", got {s:?}"))?;
  let email = rest
    .strip_suffix('>')
    .ok_or_else(|| format!("missing closing '>' in {s:?}"))?;
  let (name, email) = (name.trim(), email.trim());
  if name.is_empty() || email.is_empty() {
    return Err(format!("both name and email are required in {s:?}"));
  }
  Ok(RespondentDraft { name: name.to_owned(), email: email.to_owned() })
}

/// Parse `QUESTION_ID=TEXT`.
fn parse_answer(s: &str) -> Result<Answer, String> {
  let (id, answer) = s
    .split_once('=')
    .ok_or_else(|| format!("expected QUESTION_ID=TEXT, got {s:?}"))?;
  let id: i64 = id
    .trim()
    .parse()
    .map_err(|_| format!("invalid question id {id:?}"))?;
  Ok(Answer { question_id: QuestionId(id), answer: answer.to_owned() })
}

fn respondent_choice(
  respondent_id: Option<i64>,
  name: Option<String>,
  email: Option<String>,
) -> Result<RespondentChoice> {
  match (respondent_id, name, email) {
    (Some(id), _, _) => Ok(RespondentChoice::Existing { respondent_id: RespondentId(id) }),
    (None, Some(name), Some(email)) => Ok(RespondentChoice::New { name, email }),
    _ => bail!("pass --respondent-id, or both --name and --email"),
  }
}

// ─── Config file ──────────────────────────────────────────────────────────────

/// Shape of the optional TOML config file.
#[derive(Deserialize, Default, Debug, PartialEq, Eq)]
struct ConfigFile {
  #[serde(default)]
  url: String,
}

impl ConfigFile {
  fn load(path: Option<&PathBuf>) -> Result<Self> {
    let Some(path) = path else {
      return Ok(Self::default());
    };
    let raw = std::fs::read_to_string(path)
      .with_context(|| format!("reading config file {}", path.display()))?;
    toml::from_str(&raw).context("parsing config file")
  }
}

/// The flag (or `TALLY_URL`, which clap folds into it) wins over the file,
/// which wins over the default.
fn resolve_url(flag: Option<String>, file: &ConfigFile) -> String {
  flag
    .or_else(|| (!file.url.is_empty()).then(|| file.url.clone()))
    .unwrap_or_else(|| DEFAULT_URL.to_string())
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let args = Args::parse();
  let file_cfg = ConfigFile::load(args.config.as_ref())?;
  let client = ApiClient::new(ApiConfig { base_url: resolve_url(args.url, &file_cfg) })?;

  run(&client, args.command).await
}

fn print<T: Serialize>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

async fn run(client: &ApiClient, command: Command) -> Result<()> {
  match command {
    Command::List => print(&client.list_surveys().await?),
    Command::Show { id } => print(&client.survey_detail(SurveyId(id)).await?),
    Command::Create { title, respondents, questions } => {
      let draft = SurveyDraft { title, respondents, questions };
      print(&client.create_survey(&draft).await?)
    }
    Command::Delete { id } => print(&client.delete_survey(SurveyId(id)).await?),
    Command::AddRespondent { survey, name, email } => {
      print(&client.add_respondent(SurveyId(survey), &name, &email).await?)
    }
    Command::AddQuestion { survey, text } => {
      print(&client.add_question(SurveyId(survey), &text).await?)
    }
    Command::RemoveRespondent { survey, respondent } => print(
      &client
        .remove_respondent(SurveyId(survey), RespondentId(respondent))
        .await?,
    ),
    Command::RemoveQuestion { survey, question } => print(
      &client
        .remove_question(SurveyId(survey), QuestionId(question))
        .await?,
    ),
    Command::Respond { survey, respondent_id, name, email, answers } => {
      let submission = Submission {
        respondent: Some(respondent_choice(respondent_id, name, email)?),
        answers,
      };
      print(&client.respond(SurveyId(survey), &submission).await?)
    }
    Command::Publish { survey, respondents, questions } => {
      let respondents: Vec<_> = respondents.into_iter().map(RespondentId).collect();
      let questions: Vec<_> = questions.into_iter().map(QuestionId).collect();
      print(&client.publish(SurveyId(survey), &respondents, &questions).await?)
    }
    Command::Unpublish { survey } => print(&client.unpublish(SurveyId(survey)).await?),
    Command::Published { survey: None } => print(&client.published().await?),
    Command::Published { survey: Some(id) } => print(&client.published_survey(SurveyId(id)).await?),
  }
}
