//! Backlog CLI - epics, stories, dependencies and the next-story pull.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use backlog_core::{
    Criterion, EpicId, NewComment, NewEpic, NewStory, Story, StoryFilter, StoryId, StoryScope,
    StoryStatus, StructuredFieldsUpdate, Task,
};
use backlog_engine::{BacklogService, EngineConfig, Resolution};
use backlog_storage::JsonStorage;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "backlog")]
#[command(about = "Story dependency and readiness tracking for agent teams", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Storage directory
    #[arg(short, long, env = "BACKLOG_STORAGE", default_value = ".backlog")]
    storage: PathBuf,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Attempts at claiming a story before giving up
    #[arg(long, default_value = "3", value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..))]
    claim_attempts: usize,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage epics
    Epic {
        #[command(subcommand)]
        command: EpicCommand,
    },
    /// Manage stories
    Story {
        #[command(subcommand)]
        command: StoryCommand,
    },
    /// Make a story depend on another
    Depend {
        /// Dependent story
        story: String,
        /// Prerequisite story
        depends_on: String,
    },
    /// Show a story's prerequisites and whether it is blocked
    Deps {
        /// Story ID
        story: String,
    },
    /// Claim the next ready story
    Next {
        /// Restrict to one epic
        #[arg(long)]
        epic: Option<String>,
    },
    /// List ready stories without claiming
    Ready {
        /// Restrict to one epic
        #[arg(long)]
        epic: Option<String>,
    },
    /// List stories waiting on prerequisites
    Blocked {
        /// Restrict to one epic
        #[arg(long)]
        epic: Option<String>,
    },
    /// Show stories in dependency order
    Plan {
        /// Restrict to one epic
        #[arg(long)]
        epic: Option<String>,
    },
    /// Manage a story's tasks
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },
    /// Manage a story's acceptance criteria
    Criterion {
        #[command(subcommand)]
        command: CriterionCommand,
    },
    /// Comment on a story
    Comment {
        /// Story ID
        story: String,
        /// Comment body
        content: String,
        /// Author role, e.g. "Developer Agent"
        #[arg(long)]
        role: String,
        /// Comment being answered
        #[arg(long)]
        reply_to: Option<String>,
        /// Explicit comment ID
        #[arg(long)]
        id: Option<String>,
    },
    /// Apply a structured fields update read from a JSON file ("-" for stdin)
    Fields {
        /// Story ID
        story: String,
        /// JSON payload path
        #[arg(long)]
        file: PathBuf,
    },
}

#[derive(Subcommand)]
enum EpicCommand {
    /// Create an epic
    Add {
        /// Title
        title: String,
        /// Description
        #[arg(long, default_value = "")]
        description: String,
        /// Explicit ID
        #[arg(long)]
        id: Option<String>,
    },
    /// List epics
    List,
    /// Change an epic's status
    Status {
        /// Epic ID
        id: String,
        /// Draft, Ready, InProgress, Done or OnHold
        status: String,
    },
    /// Show story counts for an epic
    Progress {
        /// Epic ID
        id: String,
    },
}

#[derive(Subcommand)]
enum StoryCommand {
    /// Create a story
    Add {
        /// Owning epic
        #[arg(long)]
        epic: String,
        /// Title
        title: String,
        /// Description
        #[arg(long, default_value = "")]
        description: String,
        /// Priority, higher is more urgent
        #[arg(long, default_value = "0", allow_negative_numbers = true)]
        priority: i32,
        /// Explicit ID
        #[arg(long)]
        id: Option<String>,
    },
    /// List stories
    List {
        /// Filter by epic
        #[arg(long)]
        epic: Option<String>,
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
    },
    /// Show story details
    Show {
        /// Story ID
        id: String,
    },
    /// Change a story's status
    Status {
        /// Story ID
        id: String,
        /// ToDo, InProgress, Review or Done
        status: String,
    },
}

#[derive(Subcommand)]
enum TaskCommand {
    /// Add or replace a task
    Set {
        /// Story ID
        story: String,
        /// Task ID
        id: String,
        /// Description
        description: String,
        /// Sort key
        #[arg(long, allow_negative_numbers = true)]
        order: i32,
        /// Mark completed
        #[arg(long)]
        completed: bool,
    },
    /// Mark a task completed
    Done {
        /// Story ID
        story: String,
        /// Task ID
        id: String,
        /// Mark as not completed instead
        #[arg(long)]
        undo: bool,
    },
}

#[derive(Subcommand)]
enum CriterionCommand {
    /// Add or replace a criterion
    Set {
        /// Story ID
        story: String,
        /// Criterion ID
        id: String,
        /// Description
        description: String,
        /// Sort key
        #[arg(long, allow_negative_numbers = true)]
        order: i32,
        /// Mark met
        #[arg(long)]
        met: bool,
    },
    /// Mark a criterion met
    Met {
        /// Story ID
        story: String,
        /// Criterion ID
        id: String,
        /// Mark as unmet instead
        #[arg(long)]
        undo: bool,
    },
}

fn init_logging() {
    // Logs go to stderr so command output on stdout stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    let storage = JsonStorage::new(&cli.storage)
        .await
        .with_context(|| format!("opening storage at {}", cli.storage.display()))?;
    debug!(path = %cli.storage.display(), "Opened storage");

    let service = BacklogService::new(storage).with_config(EngineConfig {
        claim_attempts: cli.claim_attempts,
    });
    let json = cli.json;

    match cli.command {
        Commands::Epic { command } => match command {
            EpicCommand::Add { title, description, id } => {
                let epic = service
                    .create_epic(NewEpic {
                        id: id.map(EpicId::from),
                        title,
                        description,
                    })
                    .await?;
                emit(json, &epic, |e| println!("Added epic: {} - {}", e.id, e.title))?;
            }
            EpicCommand::List => {
                let epics = service.list_epics().await?;
                emit(json, &epics, |epics| {
                    println!("Epics ({})", epics.len());
                    for epic in epics {
                        println!("  {} | {} | {}", epic.id, epic.status, epic.title);
                    }
                })?;
            }
            EpicCommand::Status { id, status } => {
                let epic = service.update_epic_status(&EpicId::from(id), &status).await?;
                emit(json, &epic, |e| println!("Epic {} is {}", e.id, e.status))?;
            }
            EpicCommand::Progress { id } => {
                let progress = service.epic_progress(&EpicId::from(id.as_str())).await?;
                emit(json, &progress, |p| {
                    println!("Epic {}: {:.0}% done", id, p.percentage);
                    println!("  ToDo: {}", p.todo);
                    println!("  InProgress: {}", p.in_progress);
                    println!("  Review: {}", p.review);
                    println!("  Done: {}", p.done);
                })?;
            }
        },
        Commands::Story { command } => match command {
            StoryCommand::Add {
                epic,
                title,
                description,
                priority,
                id,
            } => {
                let story = service
                    .create_story(NewStory {
                        id: id.map(StoryId::from),
                        epic_id: EpicId::from(epic),
                        title,
                        description,
                        priority,
                        tasks: Vec::new(),
                        acceptance_criteria: Vec::new(),
                    })
                    .await?;
                emit(json, &story, |s| println!("Added story: {} - {}", s.id, s.title))?;
            }
            StoryCommand::List { epic, status } => {
                let status = status
                    .map(|s| s.parse::<StoryStatus>())
                    .transpose()?
                    .map(|s| vec![s]);
                let filter = StoryFilter {
                    epic_id: epic.map(EpicId::from),
                    status,
                };
                let stories = service.list_stories(&filter).await?;
                emit(json, &stories, |stories| print_story_list("Stories", stories))?;
            }
            StoryCommand::Show { id } => {
                let story = service.get_story(&StoryId::from(id)).await?;
                emit(json, &story, print_story)?;
            }
            StoryCommand::Status { id, status } => {
                let story = service.update_story_status(&StoryId::from(id), &status).await?;
                emit(json, &story, |s| println!("Story {} is {}", s.id, s.status))?;
            }
        },
        Commands::Depend { story, depends_on } => {
            let outcome = service
                .add_dependency(&StoryId::from(story.as_str()), &StoryId::from(depends_on.as_str()))
                .await?;
            emit(json, &outcome, |o| println!("{} -> {}: {:?}", story, depends_on, o))?;
        }
        Commands::Deps { story } => {
            let id = StoryId::from(story);
            let resolution = service.check_dependencies(&id).await?;
            let prerequisites = service.dependencies_of(&id).await?;
            #[derive(Serialize)]
            struct Deps<'a> {
                dependencies: &'a [StoryId],
                resolution: &'a Resolution,
            }
            let deps = Deps {
                dependencies: &prerequisites,
                resolution: &resolution,
            };
            emit(json, &deps, |d| {
                println!("Story {} depends on {} stories", id, d.dependencies.len());
                for dep in d.dependencies {
                    println!("  {}", dep);
                }
                match d.resolution {
                    Resolution::Ready => println!("Ready"),
                    Resolution::Blocked(by) => {
                        let by: Vec<_> = by.iter().map(|s| s.as_str()).collect();
                        println!("Blocked by: {}", by.join(", "));
                    }
                }
            })?;
        }
        Commands::Next { epic } => {
            let story = service.next_ready_story(&scope(epic)).await?;
            emit(json, &story, |s| match s {
                Some(story) => {
                    println!("Claimed story:");
                    print_story(story);
                }
                None => println!("No ready story"),
            })?;
        }
        Commands::Ready { epic } => {
            let stories = service.list_ready_stories(&scope(epic)).await?;
            emit(json, &stories, |stories| print_story_list("Ready stories", stories))?;
        }
        Commands::Blocked { epic } => {
            let blocked = service.blocked_stories(&scope(epic)).await?;
            emit(json, &blocked, |blocked| {
                println!("Blocked stories ({})", blocked.len());
                for entry in blocked {
                    let waiting: Vec<_> = entry.waiting_on.iter().map(|s| s.as_str()).collect();
                    println!(
                        "  {} | {} - waiting on {}",
                        entry.story.id,
                        entry.story.title,
                        waiting.join(", ")
                    );
                }
            })?;
        }
        Commands::Plan { epic } => {
            let plan = service.dependency_plan(&scope(epic)).await?;
            emit(json, &plan, |stories| print_story_list("Plan", stories))?;
        }
        Commands::Task { command } => {
            let story = match command {
                TaskCommand::Set {
                    story,
                    id,
                    description,
                    order,
                    completed,
                } => {
                    let mut task = Task::new(id, description, order);
                    task.completed = completed;
                    service.upsert_task(&StoryId::from(story), task).await?
                }
                TaskCommand::Done { story, id, undo } => {
                    service
                        .set_task_completed(&StoryId::from(story), &id, !undo)
                        .await?
                }
            };
            emit(json, &story, print_story)?;
        }
        Commands::Criterion { command } => {
            let story = match command {
                CriterionCommand::Set {
                    story,
                    id,
                    description,
                    order,
                    met,
                } => {
                    let mut criterion = Criterion::new(id, description, order);
                    criterion.met = met;
                    service.upsert_criterion(&StoryId::from(story), criterion).await?
                }
                CriterionCommand::Met { story, id, undo } => {
                    service
                        .set_criterion_met(&StoryId::from(story), &id, !undo)
                        .await?
                }
            };
            emit(json, &story, print_story)?;
        }
        Commands::Comment {
            story,
            content,
            role,
            reply_to,
            id,
        } => {
            let mut comment = NewComment::new(role, content);
            comment.reply_to_id = reply_to;
            comment.id = id;
            let story = service.add_comment(&StoryId::from(story), comment).await?;
            emit(json, &story, print_story)?;
        }
        Commands::Fields { story, file } => {
            let update: StructuredFieldsUpdate = serde_json::from_str(&read_payload(&file)?)
                .with_context(|| format!("parsing {}", file.display()))?;
            let story = service
                .update_structured_fields(&StoryId::from(story), update)
                .await?;
            emit(json, &story, print_story)?;
        }
    }

    Ok(())
}

fn scope(epic: Option<String>) -> StoryScope {
    match epic {
        Some(id) => StoryScope::epic(EpicId::from(id)),
        None => StoryScope::all(),
    }
}

fn read_payload(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        return Ok(buf);
    }
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

/// Print `value` as JSON, or hand it to `human` for plain output.
fn emit<T: Serialize + ?Sized>(json: bool, value: &T, human: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human(value);
    }
    Ok(())
}

fn print_story_list(heading: &str, stories: &[Story]) {
    println!("{} ({})", heading, stories.len());
    for story in stories {
        println!(
            "  {} | {} | {} - {}",
            story.id, story.status, story.priority, story.title
        );
    }
}

fn print_story(story: &Story) {
    println!("Story: {}", story.id);
    println!("  Title: {}", story.title);
    println!("  Epic: {}", story.epic_id);
    println!("  Status: {}", story.status);
    println!("  Priority: {}", story.priority);
    println!("  Created: {}", story.created_at);
    if !story.description.is_empty() {
        println!("  Description: {}", story.description);
    }

    let tasks = story.tasks_in_order();
    if !tasks.is_empty() {
        println!("  Tasks:");
        for task in tasks {
            let mark = if task.completed { "x" } else { " " };
            println!("    [{}] {} {}", mark, task.id, task.description);
        }
    }

    let criteria = story.criteria_in_order();
    if !criteria.is_empty() {
        println!("  Acceptance criteria:");
        for criterion in criteria {
            let mark = if criterion.met { "x" } else { " " };
            println!("    [{}] {} {}", mark, criterion.id, criterion.description);
        }
    }

    if !story.comments.is_empty() {
        println!("  Comments:");
        for comment in &story.comments {
            match &comment.reply_to_id {
                Some(parent) => println!(
                    "    {} ({}, re {}): {}",
                    comment.id, comment.author_role, parent, comment.content
                ),
                None => println!("    {} ({}): {}", comment.id, comment.author_role, comment.content),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_attempts_must_be_positive() {
        let cli = Cli::try_parse_from(["backlog", "--claim-attempts", "2", "next"]).unwrap();
        assert_eq!(cli.claim_attempts, 2);

        let cli = Cli::try_parse_from(["backlog", "next"]).unwrap();
        assert_eq!(cli.claim_attempts, 3);

        assert!(Cli::try_parse_from(["backlog", "--claim-attempts", "0", "next"]).is_err());
    }
}
