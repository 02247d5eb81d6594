//! Foreman CLI — command-line interface for the work-order orchestration
//! engine. Reuses the same core domain logic (foreman-core) that the
//! runner-facing services embed.

mod commands;

use clap::{Parser, Subcommand};

/// Foreman CLI — work-order orchestration engine
#[derive(Parser)]
#[command(name = "foreman", version, about = "Foreman CLI — work-order orchestration engine")]
pub struct Cli {
    /// Path to the SQLite database file
    #[arg(long, env = "FOREMAN_DB_PATH", default_value = "foreman.db")]
    db: String,

    /// Base URL of the runner's session API
    #[arg(long, env = "FOREMAN_RUNNER_URL", default_value = "http://127.0.0.1:4100")]
    runner_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage agents
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },

    /// Manage work orders
    Order {
        #[command(subcommand)]
        action: OrderAction,
    },

    /// Run one automated dispatch pass over the planned queue
    Dispatch {
        /// Maximum planned work orders to pull
        #[arg(long, default_value_t = 10)]
        limit: u32,
        /// Select and score without persisting or spawning
        #[arg(long)]
        dry_run: bool,
    },

    /// Inspect workflow definitions
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },

    /// Manage operations
    Operation {
        #[command(subcommand)]
        action: OperationAction,
    },

    /// Inspect escalation approvals
    Approval {
        #[command(subcommand)]
        action: ApprovalAction,
    },
}

#[derive(Subcommand)]
enum AgentAction {
    /// List all agents
    List,
    /// Register a new agent
    Create {
        /// Display name
        #[arg(long)]
        name: String,
        /// Agent kind: WORKER, MANAGER, CEO, GUARD
        #[arg(long, default_value = "WORKER")]
        kind: String,
        /// Station (e.g. build, qa, security)
        #[arg(long, default_value = "build")]
        station: String,
        /// Max concurrent operations
        #[arg(long, default_value_t = 2)]
        wip_limit: u32,
        /// Free-text role description
        #[arg(long)]
        role_text: Option<String>,
        /// Capability flags (comma-separated, e.g. "delegation,messaging")
        #[arg(long, value_delimiter = ',')]
        capabilities: Option<Vec<String>>,
        /// External session key for oversight routing
        #[arg(long)]
        session_key: Option<String>,
    },
    /// Update an agent's status
    SetStatus {
        /// Agent ID
        #[arg(long)]
        id: String,
        /// New status: IDLE, ACTIVE, BLOCKED, ERROR
        #[arg(long)]
        status: String,
    },
}

#[derive(Subcommand)]
enum OrderAction {
    /// List work orders, optionally filtered by state
    List {
        /// Filter: PLANNED, ACTIVE, BLOCKED, REVIEW, SHIPPED, CANCELLED
        #[arg(long)]
        state: Option<String>,
    },
    /// Create a new work order in the planned queue
    Create {
        /// Short code (e.g. WO-17)
        #[arg(long)]
        code: String,
        /// Title
        #[arg(long)]
        title: String,
        /// Goal text
        #[arg(long)]
        goal: String,
        /// Priority: LOW, NORMAL, HIGH, URGENT
        #[arg(long, default_value = "NORMAL")]
        priority: String,
        /// Routing template (e.g. bug_fix)
        #[arg(long)]
        template: Option<String>,
        /// Workflow ID (e.g. feature_delivery)
        #[arg(long)]
        workflow: Option<String>,
    },
    /// Show one work order with its operations
    Get {
        /// Work order ID
        #[arg(long)]
        id: String,
    },
    /// Start a work order's workflow at its first runnable stage
    Initiate {
        /// Work order ID
        #[arg(long)]
        id: String,
        /// Workflow ID override
        #[arg(long)]
        workflow: Option<String>,
        /// Context flags to set true (comma-separated, e.g.
        /// "deployment_needed,security_sensitive")
        #[arg(long, value_delimiter = ',')]
        flags: Option<Vec<String>>,
    },
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// List built-in workflow definitions and their stages
    List,
}

#[derive(Subcommand)]
enum OperationAction {
    /// List operations for a work order
    List {
        /// Work order ID
        #[arg(long)]
        work_order: String,
    },
    /// Report an agent's completion for an operation
    Complete {
        /// Operation ID
        #[arg(long)]
        id: String,
        /// Stage outcome: approved, rejected, vetoed, completed
        #[arg(long, default_value = "approved")]
        outcome: String,
        /// Reviewer feedback (used by rejected/vetoed)
        #[arg(long)]
        feedback: Option<String>,
        /// Stage output forwarded to the next stage
        #[arg(long)]
        output: Option<String>,
        /// Declared artifacts (comma-separated)
        #[arg(long, value_delimiter = ',')]
        artifacts: Option<Vec<String>>,
    },
}

#[derive(Subcommand)]
enum ApprovalAction {
    /// List pending approvals
    Pending,
    /// List approvals for a work order
    List {
        /// Work order ID
        #[arg(long)]
        work_order: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "foreman_core=warn,foreman_cli=info".into()),
        )
        .init();

    let state = commands::init_state(&cli.db, &cli.runner_url);

    let result = match cli.command {
        Commands::Agent { action } => match action {
            AgentAction::List => commands::agent::list(&state).await,
            AgentAction::Create {
                name,
                kind,
                station,
                wip_limit,
                role_text,
                capabilities,
                session_key,
            } => {
                commands::agent::create(
                    &state,
                    &name,
                    &kind,
                    &station,
                    wip_limit,
                    role_text.as_deref(),
                    capabilities,
                    session_key,
                )
                .await
            }
            AgentAction::SetStatus { id, status } => {
                commands::agent::set_status(&state, &id, &status).await
            }
        },

        Commands::Order { action } => match action {
            OrderAction::List { state: filter } => {
                commands::order::list(&state, filter.as_deref()).await
            }
            OrderAction::Create {
                code,
                title,
                goal,
                priority,
                template,
                workflow,
            } => {
                commands::order::create(&state, &code, &title, &goal, &priority, template, workflow)
                    .await
            }
            OrderAction::Get { id } => commands::order::get(&state, &id).await,
            OrderAction::Initiate { id, workflow, flags } => {
                commands::order::initiate(&state, &id, workflow.as_deref(), flags).await
            }
        },

        Commands::Dispatch { limit, dry_run } => {
            commands::dispatch::run(&state, limit, dry_run).await
        }

        Commands::Workflow { action } => match action {
            WorkflowAction::List => commands::workflow::list(&state).await,
        },

        Commands::Operation { action } => match action {
            OperationAction::List { work_order } => {
                commands::operation::list(&state, &work_order).await
            }
            OperationAction::Complete {
                id,
                outcome,
                feedback,
                output,
                artifacts,
            } => {
                commands::operation::complete(&state, &id, &outcome, feedback, output, artifacts)
                    .await
            }
        },

        Commands::Approval { action } => match action {
            ApprovalAction::Pending => commands::approval::pending(&state).await,
            ApprovalAction::List { work_order } => {
                commands::approval::list(&state, &work_order).await
            }
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
