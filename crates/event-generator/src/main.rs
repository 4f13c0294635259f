//! 事件模拟器入口

use anyhow::Context;
use chargeflow_shared::config::KafkaConfig;
use chargeflow_shared::kafka::KafkaProducer;
use chargeflow_shared::shutdown::Shutdown;
use clap::Parser;
use event_generator::{BundleGenerator, Cli, Emitter};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 优先使用环境变量 RUST_LOG，否则使用命令行参数指定的级别
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .init();

    let kafka_config = KafkaConfig {
        brokers: cli.kafka_brokers.clone(),
        ..Default::default()
    };
    let producer = KafkaProducer::new(&kafka_config).context("创建 Kafka 生产者失败")?;

    let rng = match cli.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let settings = cli.settings();
    info!(
        brokers = %cli.kafka_brokers,
        interval_ms = cli.interval_ms,
        bundles = ?cli.bundles,
        duplicate_rate = settings.duplicate_rate,
        out_of_order_rate = settings.out_of_order_rate,
        "event-generator 已启动"
    );

    let shutdown = Shutdown::new();
    shutdown.listen_for_signals();

    let mut emitter = Emitter::new(producer, BundleGenerator::new(settings, rng));
    let stats = emitter
        .run(cli.interval(), cli.bundles, shutdown.subscribe())
        .await;

    info!(
        bundles = stats.bundles,
        sent = stats.sent,
        duplicates = stats.duplicates,
        swapped = stats.swapped,
        failed = stats.failed,
        "event-generator 已停止"
    );
    Ok(())
}
