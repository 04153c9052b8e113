use anyhow::Context;
use clap::Parser;
use serde_json::{json, Value};
use shipment_recon::utils::error::ErrorSeverity;
use shipment_recon::utils::{logger, validation::Validate};
use shipment_recon::{
    CliConfig, Command, RawExtraction, ReconConfig, ReconEngine, ReconError, SqliteShipmentStore,
};

type Engine = ReconEngine<SqliteShipmentStore, ReconConfig>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();
    let loaded = cli.load_config();

    // 初始化日誌
    match &loaded {
        Ok(config) if config.uses_json_logs() => logger::init_json_logger(cli.is_verbose(config)),
        Ok(config) => logger::init_cli_logger(cli.is_verbose(config)),
        Err(_) => logger::init_cli_logger(cli.verbose),
    }

    // 驗證配置
    let config = match loaded.and_then(|config| config.validate().map(|_| config)) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ Configuration validation failed: {}", e);
            tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
            eprintln!("❌ {}", e.user_friendly_message());
            std::process::exit(1);
        }
    };
    tracing::debug!("Effective config: {:?}", config);

    let engine = match SqliteShipmentStore::open(config.database_path())
        .and_then(|store| ReconEngine::from_parts(store, config))
    {
        Ok(engine) => engine,
        Err(e) => exit_with(&e),
    };

    match run(&engine, cli.command).await {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(err) => match err.downcast_ref::<ReconError>() {
            Some(e) => exit_with(e),
            None => Err(err),
        },
    }
}

async fn run(engine: &Engine, command: Command) -> anyhow::Result<Value> {
    let output = match command {
        Command::Upload {
            file,
            document_type,
        } => {
            let content = std::fs::read_to_string(&file)
                .with_context(|| format!("reading extraction {}", file.display()))?;
            let mut document: Value = serde_json::from_str(&content)
                .with_context(|| format!("{} is not valid JSON", file.display()))?;

            if let (Some(kind), Some(object)) = (document_type, document.as_object_mut()) {
                object.remove("document_type");
                object.remove("fileType");
                object.insert("documentType".to_string(), json!(kind.as_str()));
            }

            let extraction: RawExtraction =
                serde_json::from_value(document).map_err(ReconError::from)?;
            serde_json::to_value(engine.apply_upload(extraction).await?)?
        }
        Command::Show {
            shipment_id: Some(shipment_id),
            ..
        } => serde_json::to_value(engine.shipment(&shipment_id).await?)?,
        Command::Show {
            master: Some(master),
            ..
        } => serde_json::to_value(engine.shipments_for_master(&master).await?)?,
        Command::Show { .. } => anyhow::bail!("show needs a shipment id or --master"),
        Command::Discrepancies { shipment_id } => {
            let session = engine.open_arbitration(&shipment_id).await?;
            json!({
                "shipment_id": shipment_id,
                "rows": session.rows(),
                "pending": session.pending_fields(),
            })
        }
        Command::Finalize { shipment_id, picks } => {
            let mut session = engine.open_arbitration(&shipment_id).await?;
            for (field, side) in picks {
                session = session.select(field, side)?;
            }
            serde_json::to_value(engine.finalize_session(session).await?)?
        }
        Command::History { shipment_id } => {
            serde_json::to_value(engine.history(&shipment_id).await?)?
        }
    };

    Ok(output)
}

fn exit_with(e: &ReconError) -> ! {
    // 記錄詳細錯誤信息
    tracing::error!(
        "❌ Command failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());

    // 根據錯誤嚴重程度決定退出碼
    let exit_code = match e.severity() {
        ErrorSeverity::Low => 4,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code);
}
