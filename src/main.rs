use anyhow::Context;
use invoice_field_extractor::{
    corpus, report, AppConfig, DatasetAssembler, Evaluator, ExtractError, FieldExtractor, FsBlobStore,
    ModelRegistry, PrecomputedFeatures,
};
use std::path::PathBuf;
use tracing::{debug, info, warn};
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // 初始化日志 - 本地时间格式，RUST_LOG 可覆盖级别
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 加载配置 (可选的第一个参数为配置文件路径)
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref()).context("failed to load configuration")?;
    info!(
        "Starting with model {} on corpus {}",
        config.model.variant,
        config.corpus.path.display()
    );

    let invoices = corpus::load_corpus(&config.corpus.path)
        .with_context(|| format!("failed to load corpus from {}", config.corpus.path.display()))?;

    let assembler = DatasetAssembler::new(PrecomputedFeatures, config.feature_set()?)
        .with_scaling_factor(config.dataset.others_scaling_factor);

    // 按发票划分训练/测试集
    let packet = assembler.create_train_and_test_packet(
        &invoices,
        config.dataset.train_ratio,
        config.dataset.shuffle_seed,
        config.dataset.balance_others,
    )?;

    // 训练或加载模型
    let variant = config.model.variant;
    let store = FsBlobStore::new(&config.model.store_dir);
    let mut registry = ModelRegistry::with_settings(store, config.model.training());

    let mut ready = false;
    if config.model.reuse_persisted {
        match registry.load(variant) {
            Ok(_) => ready = true,
            Err(ExtractError::ModelNotReady { location, .. }) => {
                info!("No persisted {} model at {}, training a new one", variant, location)
            }
            Err(e) => return Err(e).context("failed to load persisted model"),
        }
    }
    if !ready {
        match registry.train(variant, &packet.train) {
            Ok(_) => {}
            // 模型仍在内存中可用
            Err(e @ ExtractError::Persistence { .. }) => warn!("Continuing without persisted model: {}", e),
            Err(e) => return Err(e).context("training failed"),
        }
    }
    let model = registry.model(variant)?;

    // 测试集分类报告
    let evaluator = Evaluator::new(&assembler);
    if packet.test.is_empty() {
        warn!("Evaluation set is empty, skipping classification report");
    } else {
        let summary = evaluator.evaluate(&packet.test, model)?;
        info!(
            "{} on {} held-out tokens: accuracy {:.4}",
            variant, summary.total, summary.accuracy
        );
        println!("{}", summary);
    }

    // 发票级准确率排名
    let ranking = evaluator.rank_by_accuracy(&invoices, model)?;
    report::write_scores_json(&ranking, &config.report.json_path)?;
    if let Some(csv_path) = &config.report.csv_path {
        report::write_scores_csv(&ranking, csv_path)?;
    }
    for line in report::worst_performers(&ranking, config.report.top_n).lines() {
        info!("{}", line);
    }

    // 对测试集发票抽取字段
    let extractor = FieldExtractor::new(&assembler);
    for (_, result) in extractor.extract_batch(&packet.test_invoices, model) {
        if let Ok(fields) = result {
            debug!("{}", report::render_assignments(&fields));
        }
    }

    info!("Done");
    Ok(())
}
