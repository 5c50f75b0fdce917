//! Weather and image lookups behind `/weather`, `/photo` and `/image`

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

const WEATHER_API: &str = "https://api.weatherapi.com/v1";
const UNSPLASH_API: &str = "https://api.unsplash.com";
const POLLINATIONS_API: &str = "https://image.pollinations.ai";

/// Image to send by URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Photo {
    pub url: String,
    pub caption: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeatherReport {
    pub city: String,
    pub country: String,
    pub condition: String,
    pub temp_c: f64,
    pub local_time: String,
}

impl WeatherReport {
    pub fn render(&self) -> String {
        format!(
            "{}, {}\n{}\n{:.1}°C\n{}",
            self.city, self.country, self.condition, self.temp_c, self.local_time
        )
    }
}

#[async_trait]
pub trait Lookups: Send + Sync {
    async fn weather(&self, city: &str) -> Result<WeatherReport>;

    async fn random_photo(&self, query: &str) -> Result<Photo>;

    /// Build a generated-image URL; the platform fetches it when sending
    fn ai_image(&self, prompt: &str) -> Result<Photo>;
}

#[derive(Debug, Deserialize)]
struct WeatherResponse {
    location: WeatherLocation,
    current: WeatherCurrent,
}

#[derive(Debug, Deserialize)]
struct WeatherLocation {
    name: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    localtime: String,
}

#[derive(Debug, Deserialize)]
struct WeatherCurrent {
    temp_c: f64,
    condition: WeatherCondition,
}

#[derive(Debug, Deserialize)]
struct WeatherCondition {
    text: String,
}

#[derive(Debug, Deserialize)]
struct UnsplashPhoto {
    urls: UnsplashUrls,
    user: UnsplashUser,
}

#[derive(Debug, Deserialize)]
struct UnsplashUrls {
    #[serde(default)]
    regular: String,
}

#[derive(Debug, Deserialize)]
struct UnsplashUser {
    #[serde(default)]
    name: String,
}

/// Lookups over public HTTP APIs
pub struct HttpLookups {
    client: reqwest::Client,
    weather_key: Option<String>,
    unsplash_key: Option<String>,
    weather_base: String,
    unsplash_base: String,
    pollinations_base: String,
}

impl HttpLookups {
    pub fn new(weather_key: Option<String>, unsplash_key: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            weather_key,
            unsplash_key,
            weather_base: WEATHER_API.into(),
            unsplash_base: UNSPLASH_API.into(),
            pollinations_base: POLLINATIONS_API.into(),
        }
    }

    /// Override all endpoints with one base URL (tests)
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.weather_base = base_url.to_string();
        self.unsplash_base = base_url.to_string();
        self.pollinations_base = base_url.to_string();
        self
    }
}

#[async_trait]
impl Lookups for HttpLookups {
    async fn weather(&self, city: &str) -> Result<WeatherReport> {
        let Some(key) = &self.weather_key else {
            bail!("WEATHER_API_KEY not set");
        };

        let response = self
            .client
            .get(format!("{}/current.json", self.weather_base))
            .query(&[("key", key.as_str()), ("q", city)])
            .send()
            .await
            .context("weather request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("weather API error (status {}): {}", status.as_u16(), body);
        }

        let parsed: WeatherResponse = response.json().await.context("failed to decode weather response")?;
        Ok(WeatherReport {
            city: parsed.location.name,
            country: parsed.location.country,
            condition: parsed.current.condition.text,
            temp_c: parsed.current.temp_c,
            local_time: parsed.location.localtime,
        })
    }

    async fn random_photo(&self, query: &str) -> Result<Photo> {
        let Some(key) = &self.unsplash_key else {
            bail!("UNSPLASH_ACCESS_KEY not set");
        };

        let response = self
            .client
            .get(format!("{}/photos/random", self.unsplash_base))
            .query(&[("query", query), ("client_id", key.as_str())])
            .send()
            .await
            .context("unsplash request failed")?;

        let status = response.status();
        if !status.is_success() {
            bail!("unsplash API error (status {})", status.as_u16());
        }

        let photo: UnsplashPhoto = response.json().await.context("failed to decode unsplash photo")?;
        if photo.urls.regular.is_empty() {
            bail!("unsplash response has no photo url");
        }

        Ok(Photo {
            url: photo.urls.regular,
            caption: format!("Photo by {}", photo.user.name),
        })
    }

    fn ai_image(&self, prompt: &str) -> Result<Photo> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            bail!("prompt cannot be empty");
        }

        let mut url = reqwest::Url::parse(&self.pollinations_base).context("invalid image endpoint")?;
        url.path_segments_mut()
            .map_err(|_| anyhow::anyhow!("image endpoint cannot be a base"))?
            .pop_if_empty()
            .push("prompt")
            .push(prompt);

        Ok(Photo {
            url: url.to_string(),
            caption: format!("AI-generated: {}", prompt),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn lookups(server: &MockServer) -> HttpLookups {
        HttpLookups::new(Some("wkey".into()), Some("ukey".into()), Duration::from_secs(5)).with_base_url(&server.uri())
    }

    #[tokio::test]
    async fn test_weather_report() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/current.json"))
            .and(query_param("key", "wkey"))
            .and(query_param("q", "Almaty"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{
                    "location": {"name": "Almaty", "country": "Kazakhstan", "localtime": "2024-05-01 12:00"},
                    "current": {"temp_c": 21.34, "condition": {"text": "Sunny"}}
                }"#,
            ))
            .mount(&server)
            .await;

        let report = lookups(&server).weather("Almaty").await.unwrap();
        assert_eq!(report.render(), "Almaty, Kazakhstan\nSunny\n21.3°C\n2024-05-01 12:00");
    }

    #[tokio::test]
    async fn test_weather_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_string(r#"{"error":{"message":"No matching location found."}}"#))
            .mount(&server)
            .await;

        assert!(lookups(&server).weather("Nowhere").await.is_err());
    }

    #[tokio::test]
    async fn test_weather_requires_key() {
        let lookups = HttpLookups::new(None, None, Duration::from_secs(1));
        assert!(lookups.weather("Paris").await.is_err());
        assert!(lookups.random_photo("cats").await.is_err());
    }

    #[tokio::test]
    async fn test_random_photo() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/photos/random"))
            .and(query_param("query", "mountain lake"))
            .and(query_param("client_id", "ukey"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                r#"{"urls": {"regular": "https://images.example/1.jpg"}, "user": {"name": "Jane Doe"}}"#,
            ))
            .mount(&server)
            .await;

        let photo = lookups(&server).random_photo("mountain lake").await.unwrap();
        assert_eq!(photo.url, "https://images.example/1.jpg");
        assert_eq!(photo.caption, "Photo by Jane Doe");
    }

    #[test]
    fn test_ai_image_url_is_escaped() {
        let lookups = HttpLookups::new(None, None, Duration::from_secs(1));
        let photo = lookups.ai_image("  a cat/dog in space ").unwrap();
        assert_eq!(photo.url, "https://image.pollinations.ai/prompt/a%20cat%2Fdog%20in%20space");
        assert_eq!(photo.caption, "AI-generated: a cat/dog in space");
    }

    #[test]
    fn test_ai_image_empty_prompt() {
        let lookups = HttpLookups::new(None, None, Duration::from_secs(1));
        assert!(lookups.ai_image("   ").is_err());
    }
}
