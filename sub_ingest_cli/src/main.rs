//! 订阅导入 CLI 工具

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sub_ingest_core::{
    BatchImporter, DeviceIdentity, DeviceRegistrationClient, IngestConfig, JsonFileStore, ProfileStore,
    RemarksQuota, ReqwestTransport, RequestSigner, ResilientFetcher, SharedProxyState, SubscriptionSync,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sub-ingest")]
#[command(about = "订阅与配置导入工具", long_about = None)]
struct Cli {
    /// 数据文件路径
    #[arg(short, long, default_value = ".sub_ingest.json")]
    data: PathBuf,

    /// 配置文件路径（JSON）
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// 本地 HTTP 代理端口，设置后优先经代理拉取
    #[arg(long)]
    proxy_port: Option<u16>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 导入分享链接、base64 文本或整体配置
    Import {
        /// 输入文件，不指定时读取标准输入
        input: Option<PathBuf>,
        /// 归属的订阅标识
        #[arg(short, long, default_value = "")]
        subscription: String,
        /// 替换该订阅下已有配置
        #[arg(long)]
        replace: bool,
    },
    /// 同步全部订阅
    Sync,
    /// 设备注册并同步订阅
    Register {
        /// 已注册时也重新注册
        #[arg(short, long)]
        force: bool,
    },
    /// 为请求生成认证头
    Sign {
        /// 请求地址
        url: String,
        /// 请求方法
        #[arg(short, long, default_value = "GET")]
        method: String,
        /// 请求体
        #[arg(short, long, default_value = "")]
        body: String,
    },
    /// 导出分享链接
    Export {
        /// 只导出该订阅下的配置
        #[arg(short, long)]
        subscription: Option<String>,
        /// 输出文件路径
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// 列出订阅及流量信息
    Subs,
    /// 注销当前设备订阅
    Logout,
    /// 显示设备标识
    DeviceId,
}

struct Services {
    store: Arc<JsonFileStore>,
    signer: RequestSigner,
    importer: BatchImporter,
    sync: SubscriptionSync,
    registration: DeviceRegistrationClient,
}

impl Services {
    fn build(config: &IngestConfig, data: &Path, proxy_port: Option<u16>) -> anyhow::Result<Self> {
        let store = Arc::new(
            JsonFileStore::open(data).with_context(|| format!("无法打开数据文件 {}", data.display()))?,
        );
        let transport = Arc::new(ReqwestTransport::new()?);
        let proxy = Arc::new(SharedProxyState::new());
        if let Some(port) = proxy_port {
            proxy.set(true, port);
        }

        debug!(data = %data.display(), proxy_port = ?proxy_port, "Building services");

        let signer = RequestSigner::new(config.signer.clone());
        let importer = BatchImporter::with_builtin_codecs(store.clone());
        let fetcher = Arc::new(ResilientFetcher::new(
            transport.clone(),
            proxy,
            signer.clone(),
            config.fetcher.clone(),
        ));
        let sync = SubscriptionSync::new(importer.clone(), fetcher, config.sync.clone());
        let registration = DeviceRegistrationClient::new(
            transport,
            signer.clone(),
            Arc::new(DeviceIdentity::new(store.clone())),
            sync.clone(),
            config.registration.clone(),
        );

        Ok(Self {
            store,
            signer,
            importer,
            sync,
            registration,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            debug!(path = %path.display(), "Loading config file");
            IngestConfig::from_file(path).with_context(|| format!("无法加载配置 {}", path.display()))?
        }
        None => IngestConfig::default(),
    };
    let services = Services::build(&config, &cli.data, cli.proxy_port)?;

    match cli.command {
        Commands::Import {
            input,
            subscription,
            replace,
        } => {
            do_import(&services, input.as_deref(), &subscription, !replace).await?;
        }
        Commands::Sync => {
            do_sync(&services).await;
        }
        Commands::Register { force } => {
            do_register(&services, force).await?;
        }
        Commands::Sign { url, method, body } => {
            do_sign(&services, &method, &url, &body)?;
        }
        Commands::Export { subscription, output } => {
            do_export(&services, subscription.as_deref(), output.as_deref())?;
        }
        Commands::Subs => {
            do_subs(&services)?;
        }
        Commands::Logout => {
            do_logout(&services)?;
        }
        Commands::DeviceId => {
            do_device_id(&services)?;
        }
    }

    Ok(())
}

async fn do_import(services: &Services, input: Option<&Path>, subscription: &str, append: bool) -> anyhow::Result<()> {
    let raw = match input {
        Some(path) => std::fs::read_to_string(path).with_context(|| format!("无法读取 {}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let summary = services.sync.import_text(&raw, subscription, append).await?;
    if summary.is_empty() {
        println!("no valid data");
        return Ok(());
    }

    println!("导入完成!");
    println!("配置: {}", summary.profiles);
    println!("订阅: {}", summary.subscriptions);
    if summary.failures > 0 {
        println!("解析失败: {}", summary.failures);
    }
    if summary.filtered > 0 {
        println!("被过滤: {}", summary.filtered);
    }
    Ok(())
}

async fn do_sync(services: &Services) {
    println!("正在同步 {} 个订阅...", services.store.subscriptions().len());
    let count = services.sync.sync_all().await;
    println!("同步完成，共导入 {} 个配置", count);
}

async fn do_register(services: &Services, force: bool) -> anyhow::Result<()> {
    println!("正在注册设备...");
    match services.registration.ensure_subscription(force).await? {
        Some(id) => {
            println!("注册成功!");
            println!("订阅ID: {}", id);
            println!("配置数: {}", services.store.profile_keys().len());
        }
        None => println!("注册正在进行中"),
    }
    Ok(())
}

fn do_sign(services: &Services, method: &str, url: &str, body: &str) -> anyhow::Result<()> {
    let headers = services.signer.create_auth_headers(method, url, body)?;
    for (name, value) in headers {
        println!("{}: {}", name, value);
    }
    Ok(())
}

fn do_export(services: &Services, subscription: Option<&str>, output: Option<&Path>) -> anyhow::Result<()> {
    let store = &services.store;
    let keys: Vec<String> = store
        .profile_keys()
        .into_iter()
        .filter(|key| match subscription {
            Some(sub) => store.get_profile(key).map_or(false, |p| p.subscription_id == sub),
            None => true,
        })
        .collect();

    let text = services.importer.share_profiles(&keys);
    if text.is_empty() {
        println!("no valid data");
        return Ok(());
    }

    match output {
        Some(path) => {
            std::fs::write(path, &text)?;
            println!("已导出到 {}", path.display());
        }
        None => println!("{}", text),
    }
    Ok(())
}

fn do_subs(services: &Services) -> anyhow::Result<()> {
    let store = &services.store;
    let subscriptions = store.subscriptions();
    if subscriptions.is_empty() {
        println!("暂无订阅");
        return Ok(());
    }

    let active = services.registration.current_subscription();
    for (key, item) in subscriptions {
        let marker = if active.as_deref() == Some(key.as_str()) { "*" } else { " " };
        let state = if item.enabled { "启用" } else { "停用" };
        println!("{} [{}] {} ({})", marker, key, item.remarks, state);
        println!("    地址: {}", item.url);

        if let (Some(total), Some(upload), Some(download)) = (item.total, item.upload, item.download) {
            println!("    流量: 已用 {} / 总量 {} 字节", upload + download, total);
        }
        if let Some(expire) = item.expire.filter(|e| *e > 0) {
            println!("    到期: {}", expire);
        }

        let remarks: Vec<String> = store
            .profile_keys()
            .iter()
            .filter_map(|k| store.get_profile(k))
            .filter(|p| p.subscription_id == key)
            .map(|p| p.remarks)
            .collect();
        if let Some(quota) = RemarksQuota::scan(remarks.iter().map(String::as_str)) {
            println!("    {}", serde_json::to_string(&quota)?);
        }
    }
    Ok(())
}

fn do_logout(services: &Services) -> anyhow::Result<()> {
    if !services.registration.is_registered() {
        println!("当前设备未注册");
        return Ok(());
    }
    let removed = services.registration.logout()?;
    println!("已注销，删除 {} 个配置", removed);
    Ok(())
}

fn do_device_id(services: &Services) -> anyhow::Result<()> {
    println!("{}", services.registration.identity().get_or_create()?);
    Ok(())
}
