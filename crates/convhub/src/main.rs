use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::error;
use tokio::io::AsyncWriteExt;

use convhub::config::{default_settings, load_settings, Settings};
use convhub::{ConversionService, JobLog, JobRequest, JobStatus, MediaType};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Settings file (JSON)
    #[arg(short, long, env = "CONVHUB_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert one or more files and wait for the result
    Convert {
        /// Target format: sbml, sbgn or escher
        #[arg(short, long)]
        format: String,
        /// Component options passed to the converter (JSON object)
        #[arg(long)]
        component_options: Option<String>,
        /// Layout options passed to the converter (JSON object)
        #[arg(long)]
        layout_options: Option<String>,
        /// Content type for every file instead of guessing from the extension
        #[arg(long)]
        content_type: Option<String>,
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Print a job record
    Status { id: String },
    /// Print the conversion log of a finished job
    Log { id: String },
    /// Write an output artifact to stdout
    Output { id: String, slot: u32 },
}

type CliResult = Result<ExitCode, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => load_settings(path),
        None => default_settings(),
    };
    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error loading settings: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = convhub::telemetry::init_logging(&settings.log) {
        eprintln!("Error initializing logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run(cli.command, &settings).await {
        Ok(code) => code,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands, settings: &Settings) -> CliResult {
    let service = ConversionService::open(settings)?;
    let result = execute(&service, command).await;
    service.shutdown().await;
    result
}

async fn execute(service: &ConversionService, command: Commands) -> CliResult {
    match command {
        Commands::Convert {
            format,
            component_options,
            layout_options,
            content_type,
            files,
        } => {
            convert(
                service,
                format,
                component_options,
                layout_options,
                content_type,
                files,
            )
            .await
        }
        Commands::Status { id } => {
            let job = service.status(&id).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Log { id } => print_log(service, &id).await,
        Commands::Output { id, slot } => {
            let artifact = service.output(&id, slot).await?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&artifact.bytes).await?;
            stdout.flush().await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn parse_bag(raw: Option<String>) -> Result<Option<serde_json::Value>, serde_json::Error> {
    raw.map(|s| serde_json::from_str(&s)).transpose()
}

async fn convert(
    service: &ConversionService,
    format: String,
    component_options: Option<String>,
    layout_options: Option<String>,
    content_type: Option<String>,
    files: Vec<PathBuf>,
) -> CliResult {
    let request = JobRequest {
        output_format: Some(format),
        file_count: Some(files.len() as i64),
        component_options: parse_bag(component_options)?,
        layout_options: parse_bag(layout_options)?,
    };
    let job = service.submit_job(request).await?;
    if let Some(reason) = &job.error {
        eprintln!("Job {} rejected: {}", job.id, reason);
        return Ok(ExitCode::FAILURE);
    }
    eprintln!("Job {} created", job.id);

    for (slot, path) in files.iter().enumerate() {
        let declared = match &content_type {
            Some(declared) => declared.clone(),
            None => MediaType::guess_for_path(path)
                .map(|m| m.essence().to_string())
                .ok_or_else(|| format!("cannot guess content type of {}", path.display()))?,
        };
        let payload = tokio::fs::read(path).await?;
        service.upload(&job.id, slot as u32, payload, &declared).await?;
    }

    let job = service.wait_for_terminal(&job.id).await?;
    println!("{}", serde_json::to_string_pretty(&job)?);

    if job.status != JobStatus::Completed {
        return Ok(ExitCode::FAILURE);
    }
    for slot in 0..job.file_count {
        match service.output(&job.id, slot).await {
            Ok(artifact) => eprintln!("slot {}: {}", slot, artifact.path.display()),
            Err(e) => eprintln!("slot {}: {}", slot, e),
        }
    }
    Ok(ExitCode::SUCCESS)
}

async fn print_log(service: &ConversionService, id: &str) -> CliResult {
    match service.log(id).await? {
        JobLog::Stream { mut file, .. } => {
            let mut stdout = tokio::io::stdout();
            tokio::io::copy(&mut file, &mut stdout).await?;
            Ok(ExitCode::SUCCESS)
        }
        JobLog::Errored { message } => {
            eprintln!("Conversion did not run: {}", message);
            Ok(ExitCode::FAILURE)
        }
    }
}
