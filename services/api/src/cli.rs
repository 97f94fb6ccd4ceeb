use crate::commands::{run_history, run_send, HistoryArgs, SendArgs};
use crate::demo::{run_demo, DemoArgs};
use crate::server;
use church_outreach::campaigns::{BatchStatus, Channel};
use church_outreach::error::AppError;
use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "Church Outreach",
    about = "Send SMS and WhatsApp campaigns to the congregation and review their delivery history",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Dispatch a campaign from the command line
    Send(SendArgs),
    /// List past campaigns or export them as CSV
    History(HistoryArgs),
    /// Run a simulated campaign against an in-process carrier
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChannelArg {
    Sms,
    Whatsapp,
}

impl From<ChannelArg> for Channel {
    fn from(value: ChannelArg) -> Self {
        match value {
            ChannelArg::Sms => Channel::Sms,
            ChannelArg::Whatsapp => Channel::WhatsApp,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StatusArg {
    InProgress,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl From<StatusArg> for BatchStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::InProgress => BatchStatus::InProgress,
            StatusArg::Completed => BatchStatus::Completed,
            StatusArg::CompletedWithErrors => BatchStatus::CompletedWithErrors,
            StatusArg::Failed => BatchStatus::Failed,
        }
    }
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Send(args) => run_send(args).await,
        Command::History(args) => run_history(args),
        Command::Demo(args) => run_demo(args).await,
    }
}
