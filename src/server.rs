use crate::config::Settings;
use crate::identity::{HostIdentity, identify};
use crate::platform::Platform;
use crate::sampler::{Sampler, Snapshot, sampling_window};
use anyhow::Result;
use chrono::{DateTime, Local};
use hyper::body::HttpBody;
use hyper::header::{CACHE_CONTROL, CONTENT_TYPE, HeaderValue};
use hyper::http::StatusCode;
use hyper::server::conn::AddrStream;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server};
use log::{error, info, warn};
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// 表单正文的上限，只需要容纳一个 `dt` 字段
const MAX_FORM_BYTES: usize = 4 * 1024;

/// 请求间共享的只读状态
struct ServerState<P> {
    platform: Arc<P>,
    settings_path: PathBuf,
}

impl<P: Platform> ServerState<P> {
    /// 每个请求重新读取设置，修改设置文件无需重启
    fn load_settings(&self) -> Result<Settings> {
        Settings::load(&self.settings_path).inspect_err(|e| {
            warn!("重新加载设置失败: {e:#}");
        })
    }

    fn sampler(&self, settings: &Settings) -> Sampler<P> {
        Sampler::new(self.platform.clone(), settings.sampler_options())
    }
}

/// `/api/stats` 附带的请求信息
#[derive(Debug, Serialize)]
struct RequestInfo {
    time: DateTime<Local>,
    elapsed: f64,
    request_ip: String,
    dt: f64,
}

#[derive(Debug, Serialize)]
struct ApiStats {
    stats: Snapshot,
    network: HostIdentity,
    info: RequestInfo,
}

/// 状态服务器
pub struct StatusServer<P> {
    state: Arc<ServerState<P>>,
}

impl<P: Platform + 'static> StatusServer<P> {
    /// 创建新的状态服务器实例
    #[inline]
    pub fn new(platform: P, settings_path: impl Into<PathBuf>) -> Self {
        Self {
            state: Arc::new(ServerState {
                platform: Arc::new(platform),
                settings_path: settings_path.into(),
            }),
        }
    }

    /// 运行服务器
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let state = self.state;

        let make_svc = make_service_fn(move |conn: &AddrStream| {
            let state = state.clone();
            let remote = conn.remote_addr();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| {
                    Self::handle_request(req, state.clone(), remote)
                }))
            }
        });

        let server = Server::try_bind(&addr)?
            .http1_keepalive(true)
            .http1_half_close(false)
            .tcp_keepalive(Some(Duration::from_secs(10)))
            .tcp_nodelay(true)
            .serve(make_svc);

        info!("服务器运行在: http://{addr}");

        server.await.map_err(|e| {
            error!("服务器错误: {e}");
            anyhow::anyhow!("服务器运行错误: {e}")
        })?;

        info!("服务器正常关闭");
        Ok(())
    }

    /// 处理 HTTP 请求
    async fn handle_request(
        req: Request<Body>,
        state: Arc<ServerState<P>>,
        remote: SocketAddr,
    ) -> std::result::Result<Response<Body>, Infallible> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let response = match (&method, path.as_str()) {
            (&Method::GET, "/") | (&Method::GET, "/homepage") => Self::serve_html(&state),
            (&Method::GET, "/getstats/") | (&Method::POST, "/getstats/") => {
                Self::serve_stats(req, &state).await
            }
            (&Method::GET, "/api/stats") => Self::serve_api_stats(req, &state, remote).await,
            (&Method::GET, "/getnetwork/") | (&Method::POST, "/getnetwork/") => {
                Self::serve_network(&state).await
            }
            (&Method::GET, "/health") => Self::serve_health(),
            _ => Self::serve_404(),
        };

        info!("{remote} {method} {path} -> {}", response.status().as_u16());
        Ok(response)
    }

    /// 快照 JSON
    async fn serve_stats(req: Request<Body>, state: &ServerState<P>) -> Response<Body> {
        let dt = match Self::request_window(req).await {
            Ok(dt) => dt,
            Err(response) => return response,
        };
        let Ok(settings) = state.load_settings() else {
            return Self::serve_settings_error();
        };

        let snapshot = state
            .sampler(&settings)
            .collect(&settings.colormap, dt, &settings.server.external_hdd_path)
            .await;
        Self::serve_json(&snapshot)
    }

    /// 快照 + 主机身份 + 请求信息
    async fn serve_api_stats(
        req: Request<Body>,
        state: &ServerState<P>,
        remote: SocketAddr,
    ) -> Response<Body> {
        let started = Instant::now();
        let dt = match Self::request_window(req).await {
            Ok(dt) => dt,
            Err(response) => return response,
        };
        let Ok(settings) = state.load_settings() else {
            return Self::serve_settings_error();
        };

        let stats = state
            .sampler(&settings)
            .collect(&settings.colormap, dt, &settings.server.external_hdd_path)
            .await;
        let network = identify(state.platform.as_ref()).await;

        let body = ApiStats {
            stats,
            network,
            info: RequestInfo {
                time: Local::now(),
                elapsed: started.elapsed().as_secs_f64() * 1000.0,
                request_ip: remote.ip().to_string(),
                dt: dt.as_secs_f64(),
            },
        };
        Self::serve_json(&body)
    }

    /// 主机身份 JSON
    async fn serve_network(state: &ServerState<P>) -> Response<Body> {
        Self::serve_json(&identify(state.platform.as_ref()).await)
    }

    /// 提供主页面
    fn serve_html(state: &ServerState<P>) -> Response<Body> {
        let Ok(settings) = state.load_settings() else {
            return Self::serve_settings_error();
        };
        let mut response = Self::respond(
            StatusCode::OK,
            "text/html; charset=utf-8",
            Self::render_html_template(&settings),
        );
        response
            .headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        response
    }

    /// 渲染 HTML 模板
    pub fn render_html_template(settings: &Settings) -> String {
        // 使用内置模板（编译进二进制文件）
        let template = include_str!("../templates/index.html");
        template.replace("{background_color}", &settings.page.background_color)
    }

    /// 从查询字符串或表单正文中取出 `dt`（毫秒）
    ///
    /// 正文超过 [`MAX_FORM_BYTES`] 时返回 413 响应，不再继续读取。
    async fn request_window(
        req: Request<Body>,
    ) -> std::result::Result<Duration, Response<Body>> {
        if let Some(dt) = req.uri().query().and_then(|q| form_value(q.as_bytes(), "dt")) {
            return Ok(sampling_window(Some(dt.as_str())));
        }
        if *req.method() != Method::POST {
            return Ok(sampling_window(None));
        }

        let mut body = req.into_body();
        // 声明的长度已超限时直接拒绝
        if body.size_hint().lower() > MAX_FORM_BYTES as u64 {
            return Err(Self::serve_payload_too_large());
        }

        // 分块读取，累计长度超限立即停止
        let mut form = Vec::new();
        while let Some(chunk) = body.data().await {
            match chunk {
                Ok(chunk) if form.len() + chunk.len() <= MAX_FORM_BYTES => {
                    form.extend_from_slice(&chunk)
                }
                Ok(_) => return Err(Self::serve_payload_too_large()),
                Err(e) => {
                    warn!("读取请求正文失败: {e}");
                    return Ok(sampling_window(None));
                }
            }
        }

        Ok(sampling_window(form_value(&form, "dt").as_deref()))
    }

    #[inline]
    fn serve_payload_too_large() -> Response<Body> {
        warn!("请求正文超过 {MAX_FORM_BYTES} 字节");
        Self::serve_error("请求正文过大".to_string(), StatusCode::PAYLOAD_TOO_LARGE)
    }

    fn serve_json<T: Serialize>(value: &T) -> Response<Body> {
        match serde_json::to_vec(value) {
            Ok(body) => Self::respond(StatusCode::OK, "application/json", body),
            Err(e) => {
                error!("序列化响应失败: {e}");
                Self::serve_error("序列化失败".to_string(), StatusCode::INTERNAL_SERVER_ERROR)
            }
        }
    }

    #[inline]
    fn serve_settings_error() -> Response<Body> {
        Self::serve_error(
            "设置文件加载失败".to_string(),
            StatusCode::INTERNAL_SERVER_ERROR,
        )
    }

    /// 提供健康检查端点
    #[inline]
    fn serve_health() -> Response<Body> {
        let mut response = Self::respond(StatusCode::OK, "text/plain", "OK");
        response
            .headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        response
    }

    /// 提供 404 页面
    #[inline]
    fn serve_404() -> Response<Body> {
        warn!("请求了不存在的页面");
        Self::respond(StatusCode::NOT_FOUND, "text/plain; charset=utf-8", "页面未找到")
    }

    /// 提供错误页面
    #[inline]
    fn serve_error(message: String, status: StatusCode) -> Response<Body> {
        Self::respond(status, "text/plain; charset=utf-8", message)
    }

    fn respond(
        status: StatusCode,
        content_type: &'static str,
        body: impl Into<Body>,
    ) -> Response<Body> {
        let mut response = Response::new(body.into());
        *response.status_mut() = status;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        response
    }
}

/// 在 `application/x-www-form-urlencoded` 数据中查找一个字段
fn form_value(input: &[u8], key: &str) -> Option<String> {
    url::form_urlencoded::parse(input)
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.into_owned())
}
