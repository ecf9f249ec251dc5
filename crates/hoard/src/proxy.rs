use reqwest::Proxy;

/// Which traffic a proxy applies to
#[derive(Debug, Clone, PartialEq, Eq, Copy)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum ProxyType {
    /// Plain HTTP requests only
    Http,
    /// HTTPS requests only
    Https,
    /// SOCKS5 proxy for all requests
    Socks5,
    /// Every request, whatever the scheme
    All,
}

#[derive(Debug, Clone)]
pub struct ProxyAuth {
    pub username: String,
    pub password: String,
}

/// Proxy configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Proxy server URL (e.g., "http://proxy.example.com:8080")
    pub url: String,
    pub proxy_type: ProxyType,
    pub auth: Option<ProxyAuth>,
}

impl ProxyConfig {
    /// Build the reqwest proxy for this configuration
    pub fn to_reqwest(&self) -> Result<Proxy, String> {
        let proxy = match self.proxy_type {
            ProxyType::Http => Proxy::http(&self.url),
            ProxyType::Https => Proxy::https(&self.url),
            ProxyType::Socks5 if self.url.starts_with("socks5://") => Proxy::all(&self.url),
            ProxyType::Socks5 => Proxy::all(format!("socks5://{}", self.url)),
            ProxyType::All => Proxy::all(&self.url),
        }
        .map_err(|e| format!("Invalid {:?} proxy URL {}: {e}", self.proxy_type, self.url))?;

        Ok(match &self.auth {
            Some(auth) => proxy.basic_auth(&auth.username, &auth.password),
            None => proxy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socks5_scheme_is_added() {
        let config = ProxyConfig {
            url: "127.0.0.1:1080".to_string(),
            proxy_type: ProxyType::Socks5,
            auth: None,
        };
        assert!(config.to_reqwest().is_ok());
    }

    #[test]
    fn test_invalid_proxy_url_is_reported() {
        let config = ProxyConfig {
            url: "not a url".to_string(),
            proxy_type: ProxyType::Http,
            auth: Some(ProxyAuth {
                username: "user".to_string(),
                password: "pass".to_string(),
            }),
        };
        let err = config.to_reqwest().unwrap_err();
        assert!(err.contains("not a url"));
    }
}
