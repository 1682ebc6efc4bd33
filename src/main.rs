use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use querycore::cache::fingerprint::{param_types, query_shape, Fingerprinter};
use querycore::cache::key::cache_key;
use querycore::config::Config;
use querycore::core::types::{ParamMap, QueryJob, QueryLanguage, TimeRange};
use querycore::query::optimizer::{apply_rules, default_rules, DslTranslator, IndexAdvisor};
use querycore::query::planner::ParallelPlanner;
use querycore::query::validator::QueryValidator;
use querycore::utils::logging;

/// 查询执行核心的离线检查工具
#[derive(Parser)]
#[clap(version, author = "QueryCore Contributors")]
struct Cli {
    /// 配置文件，缺省使用默认配置
    #[clap(short, long, global = true)]
    config: Option<String>,

    /// 日志级别
    #[clap(long, global = true, default_value = "warn")]
    log_level: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 展示查询的并行执行计划
    Plan {
        #[clap(short, long, default_value = "sql")]
        language: QueryLanguage,
        #[clap(short, long)]
        query: String,
        /// 时间范围起点（RFC 3339）
        #[clap(long, requires = "end")]
        start: Option<String>,
        /// 时间范围终点（RFC 3339）
        #[clap(long, requires = "start")]
        end: Option<String>,
    },
    /// 应用改写规则并给出索引建议（不访问后端）
    Rewrite {
        #[clap(short, long)]
        query: String,
    },
    /// 把领域查询语言转换为 SQL
    Translate {
        #[clap(short, long)]
        query: String,
    },
    /// 静态验证查询
    Validate {
        #[clap(short, long, default_value = "sql")]
        language: QueryLanguage,
        #[clap(short, long)]
        query: String,
    },
    /// 计算缓存键
    CacheKey {
        #[clap(short, long, default_value = "sql")]
        language: QueryLanguage,
        #[clap(short, long)]
        query: String,
        /// JSON 对象形式的参数
        #[clap(short, long, default_value = "{}")]
        params: String,
    },
    /// 计算结构指纹
    Fingerprint {
        #[clap(short, long)]
        query: String,
        #[clap(short, long, default_value = "{}")]
        params: String,
    },
}

fn parse_params(raw: &str) -> Result<ParamMap> {
    serde_json::from_str::<ParamMap>(raw).context("参数必须是 JSON 对象")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_stderr(&cli.log_level)?;

    let config = match &cli.config {
        Some(path) => Config::load(path).with_context(|| format!("无法加载配置文件 {}", path))?,
        None => Config::default(),
    };
    config.validate()?;
    let translator = DslTranslator::new(&config.optimizer);

    let outcome = run(cli.command, &config, translator).await;
    logging::shutdown();
    outcome
}

async fn run(command: Command, config: &Config, translator: DslTranslator) -> Result<()> {
    match command {
        Command::Plan {
            language,
            query,
            start,
            end,
        } => {
            let mut job = QueryJob::new(query, language);
            if let (Some(start), Some(end)) = (start, end) {
                job = job.with_time_range(TimeRange::parse(&start, &end)?);
            }
            let planner = ParallelPlanner::new(&config.execution, translator, None);
            let plan = planner.plan(&job).await?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Command::Rewrite { query } => {
            let outcome = apply_rules(&default_rules()?, &query)?;
            println!("{}", outcome.query);
            for applied in &outcome.applied {
                println!("  规则: {}", applied);
            }
            for suggestion in IndexAdvisor::new()?.suggest(&outcome.query) {
                println!("  建议: {}", suggestion);
            }
        }
        Command::Translate { query } => {
            println!("{}", translator.translate(&query)?);
        }
        Command::Validate { language, query } => {
            let report = QueryValidator::new(None, translator).validate(language, &query).await;
            if report.valid {
                println!("ok");
            } else {
                for error in &report.errors {
                    println!("error: {}", error);
                }
                anyhow::bail!("查询未通过验证");
            }
        }
        Command::CacheKey {
            language,
            query,
            params,
        } => {
            println!("{}", cache_key(language, &query, &parse_params(&params)?));
        }
        Command::Fingerprint { query, params } => {
            let params = parse_params(&params)?;
            let fingerprinter = Fingerprinter::new(
                config.cache.fingerprint_shape_len,
                config.cache.fingerprint_prefix_len,
            );
            println!("shape:       {}", query_shape(&query, config.cache.fingerprint_shape_len));
            println!("params:      {}", param_types(&params));
            println!("fingerprint: {}", fingerprinter.fingerprint(&query, &params));
        }
    }
    Ok(())
}
