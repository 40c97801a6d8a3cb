use std::{process, sync::Arc, time::Duration};

use apalis::{
    layers::WorkerBuilderExt,
    prelude::{Monitor, WorkerBuilder, WorkerFactoryFn},
};
use apalis_cron::CronStream;
use apalis_sql::{Config as ApalisSqlConfig, postgres::PostgresStorage};
use staffetta::{
    application::{
        api_keys::{ApiKeyService, IssueApiKeyCommand},
        credits::CreditService,
        error::AppError,
        jobs::{
            JobWorkerContext, ReconcileContext, process_archive_output_job, process_notify_job,
            process_reconcile_job, reconcile_schedule,
        },
        providers::{Json2VideoProvider, PollSettings, ProviderRegistry, ShotstackProvider},
        rate_limit::{RateLimitService, RateLimitStore},
        reconciler::StuckJobReconciler,
        render_jobs::RenderJobService,
        repos::{AccountsRepo, NewAccountParams},
    },
    config::{self, RateLimitBackend},
    domain::api_keys::ApiScope,
    domain::types::QueueJobType,
    infra::{
        db::PostgresRepositories,
        error::InfraError,
        http::{ApiState, OpsState, RouterState, WebhookState, build_ops_router,
               build_public_router},
        rate_limit::MemoryRateLimitStore,
        storage::OutputStorage,
        telemetry,
    },
};
use tokio::try_join;
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Bootstrap(args) => run_bootstrap(settings, args).await,
        config::Command::Sweep(args) => run_sweep(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let (http_repositories, job_repositories) = init_repositories(&settings).await?;
    let app = build_application_context(
        http_repositories.clone(),
        job_repositories.clone(),
        &settings,
    )?;

    let monitor_handle = spawn_job_monitor(
        job_repositories,
        app.job_context.clone(),
        app.reconciler.clone(),
        &settings,
    )?;

    let result = serve_http(&settings, app.router_state, app.ops_state).await;

    monitor_handle.abort();
    let _ = monitor_handle.await;

    result
}

async fn run_bootstrap(
    settings: config::Settings,
    args: config::BootstrapArgs,
) -> Result<(), AppError> {
    let (http_repositories, _) = init_repositories(&settings).await?;

    let account = http_repositories
        .create_account(NewAccountParams {
            name: args.account_name.clone(),
            notify_url: None,
        })
        .await
        .map_err(|err| AppError::unexpected(format!("failed to create account: {err}")))?;

    let mut scopes = vec![ApiScope::Render];
    if args.operator {
        scopes.push(ApiScope::Operator);
    }

    let api_keys = ApiKeyService::new(http_repositories.clone());
    let issued = api_keys
        .issue(IssueApiKeyCommand {
            account_id: account.id,
            name: format!("{} bootstrap key", account.name),
            scopes,
        })
        .await
        .map_err(|err| AppError::unexpected(format!("failed to issue api key: {err}")))?;

    if args.credits > 0 {
        let credits = CreditService::new(http_repositories.clone());
        credits
            .grant(account.id, args.credits, "bootstrap grant")
            .await
            .map_err(|err| AppError::unexpected(format!("failed to grant credits: {err}")))?;
    }

    info!(
        target = "staffetta::bootstrap",
        account_id = %account.id,
        "account created"
    );
    println!("account_id: {}", account.id);
    println!("token: {}", issued.token);
    Ok(())
}

async fn run_sweep(settings: config::Settings, args: config::SweepArgs) -> Result<(), AppError> {
    let (http_repositories, _) = init_repositories(&settings).await?;

    let credits = CreditService::new(http_repositories.clone());
    let renders = RenderJobService::new(
        http_repositories.clone(),
        credits,
        ProviderRegistry::new(),
        http_repositories.clone(),
        PollSettings {
            interval: settings.providers.poll_interval,
            max_attempts: settings.providers.poll_max_attempts.get(),
        },
    );
    let reconciler = StuckJobReconciler::new(
        http_repositories.clone(),
        renders,
        settings.reconciler.stale_after,
    );

    let threshold = args
        .stale_after_minutes
        .map(|minutes| Duration::from_secs(minutes * 60));
    let outcome = reconciler
        .sweep(threshold)
        .await
        .map_err(|err| AppError::unexpected(format!("sweep failed: {err}")))?;

    println!("terminated {} stuck job(s)", outcome.fixed.len());
    for id in outcome.fixed {
        println!("  {id}");
    }
    Ok(())
}

struct ApplicationContext {
    router_state: RouterState,
    ops_state: OpsState,
    job_context: JobWorkerContext,
    reconciler: Arc<StuckJobReconciler>,
}

async fn init_repositories(
    settings: &config::Settings,
) -> Result<(Arc<PostgresRepositories>, Arc<PostgresRepositories>), AppError> {
    let database_url = settings
        .database
        .url
        .as_ref()
        .ok_or_else(|| InfraError::configuration("database url is not configured"))
        .map_err(AppError::from)?;

    let http_pool =
        PostgresRepositories::connect(database_url, settings.database.http_max_connections.get())
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresRepositories::run_migrations(&http_pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    let jobs_pool =
        PostgresRepositories::connect(database_url, settings.database.jobs_max_connections.get())
            .await
            .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    PostgresStorage::setup(&jobs_pool)
        .await
        .map_err(|err| AppError::from(InfraError::database(err.to_string())))?;

    Ok((
        Arc::new(PostgresRepositories::new(http_pool)),
        Arc::new(PostgresRepositories::new(jobs_pool)),
    ))
}

fn build_application_context(
    http_repositories: Arc<PostgresRepositories>,
    job_repositories: Arc<PostgresRepositories>,
    settings: &config::Settings,
) -> Result<ApplicationContext, AppError> {
    let http_client = reqwest::Client::builder()
        .timeout(settings.providers.submit_timeout)
        .build()
        .map_err(|err| AppError::unexpected(format!("failed to build http client: {err}")))?;

    let providers = ProviderRegistry::new()
        .register(Arc::new(ShotstackProvider::new(
            http_client.clone(),
            &settings.providers.shotstack,
        )))
        .register(Arc::new(Json2VideoProvider::new(
            http_client.clone(),
            &settings.providers.json2video,
        )));

    let rate_limit_store: Arc<dyn RateLimitStore> = match settings.rate_limit.backend {
        RateLimitBackend::Postgres => http_repositories.clone(),
        RateLimitBackend::Memory => Arc::new(MemoryRateLimitStore::new()),
    };
    let rate_limits = RateLimitService::new(rate_limit_store);

    let credits = CreditService::new(http_repositories.clone());
    let renders = RenderJobService::new(
        http_repositories.clone(),
        credits.clone(),
        providers,
        http_repositories.clone(),
        PollSettings {
            interval: settings.providers.poll_interval,
            max_attempts: settings.providers.poll_max_attempts.get(),
        },
    );
    let api_keys = Arc::new(ApiKeyService::new(http_repositories.clone()));
    let reconciler = Arc::new(StuckJobReconciler::new(
        http_repositories.clone(),
        renders.clone(),
        settings.reconciler.stale_after,
    ));

    let storage = Arc::new(
        OutputStorage::new(
            settings.storage.directory.clone(),
            http_client.clone(),
            settings.storage.max_download_bytes.get(),
        )
        .map_err(|err| AppError::from(InfraError::Io(err)))?,
    );

    let api_state = ApiState {
        api_keys: api_keys.clone(),
        renders: renders.clone(),
        credits: credits.clone(),
        rate_limits: rate_limits.clone(),
    };

    let webhook_state = WebhookState {
        renders: renders.clone(),
        rate_limits: rate_limits.clone(),
        secrets: settings.webhooks.clone(),
    };

    let ops_state = OpsState {
        api_keys,
        accounts: http_repositories.clone(),
        credits,
        renders,
        reconciler: reconciler.clone(),
        rate_limits,
        db: http_repositories,
    };

    let job_context = JobWorkerContext {
        jobs: job_repositories.clone(),
        accounts: job_repositories,
        storage,
        http: http_client,
    };

    Ok(ApplicationContext {
        router_state: RouterState {
            api: api_state,
            webhooks: webhook_state,
        },
        ops_state,
        job_context,
        reconciler,
    })
}

fn spawn_job_monitor(
    repositories: Arc<PostgresRepositories>,
    context: JobWorkerContext,
    reconciler: Arc<StuckJobReconciler>,
    settings: &config::Settings,
) -> Result<tokio::task::JoinHandle<()>, AppError> {
    let archive_storage = PostgresStorage::new_with_config(
        repositories.pool().clone(),
        ApalisSqlConfig::new(QueueJobType::ArchiveOutput.as_str()),
    );
    let notify_storage = PostgresStorage::new_with_config(
        repositories.pool().clone(),
        ApalisSqlConfig::new(QueueJobType::Notify.as_str()),
    );

    let archive_concurrency = settings.jobs.archive_concurrency.get() as usize;
    let notify_concurrency = settings.jobs.notify_concurrency.get() as usize;

    let archive_worker = WorkerBuilder::new("archive-output-worker")
        .concurrency(archive_concurrency)
        .data(context.clone())
        .backend(archive_storage)
        .build_fn(process_archive_output_job);
    let notify_worker = WorkerBuilder::new("notify-worker")
        .concurrency(notify_concurrency)
        .data(context)
        .backend(notify_storage)
        .build_fn(process_notify_job);

    let schedule = reconcile_schedule(&settings.reconciler.cron)
        .map_err(|err| AppError::unexpected(err.to_string()))?;
    let reconcile_ctx = ReconcileContext { reconciler };
    let reconcile_worker = WorkerBuilder::new("reconcile-worker")
        .data(reconcile_ctx)
        .backend(CronStream::new(schedule))
        .build_fn(process_reconcile_job);

    let monitor = Monitor::new()
        .register(archive_worker)
        .register(notify_worker)
        .register(reconcile_worker);

    Ok(tokio::spawn(async move {
        if let Err(err) = monitor.run().await {
            error!(error = %err, "job monitor stopped");
        }
    }))
}

async fn serve_http(
    settings: &config::Settings,
    router_state: RouterState,
    ops_state: OpsState,
) -> Result<(), AppError> {
    let public_router = build_public_router(router_state);
    let ops_router = build_ops_router(ops_state);

    let public_listener = tokio::net::TcpListener::bind(settings.server.public_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    let ops_listener = tokio::net::TcpListener::bind(settings.server.ops_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target = "staffetta::serve",
        public = %settings.server.public_addr,
        ops = %settings.server.ops_addr,
        "listening"
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
    });

    let mut public_rx = shutdown_rx.clone();
    let public_server = axum::serve(public_listener, public_router.into_make_service())
        .with_graceful_shutdown(async move {
            let _ = public_rx.changed().await;
        });
    let mut ops_rx = shutdown_rx.clone();
    let ops_server =
        axum::serve(ops_listener, ops_router.into_make_service()).with_graceful_shutdown(
            async move {
                let _ = ops_rx.changed().await;
            },
        );

    let grace = settings.server.graceful_shutdown;
    let servers = async { try_join!(public_server, ops_server) };
    tokio::pin!(servers);

    let mut main_rx = shutdown_rx;
    tokio::select! {
        result = &mut servers => {
            result.map_err(|err| AppError::unexpected(format!("server error: {err}")))?;
        }
        _ = main_rx.changed() => {
            info!(target = "staffetta::serve", "shutdown signal received");
            if tokio::time::timeout(grace, &mut servers).await.is_err() {
                warn!(
                    target = "staffetta::serve",
                    timeout_secs = grace.as_secs(),
                    "graceful shutdown timed out; exiting"
                );
            }
        }
    }

    Ok(())
}
