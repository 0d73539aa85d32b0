//! Turning user-supplied locators into playable sources.
//!
//! Search and site extraction are left to external resolvers; [`DirectResolver`]
//! only accepts things ffmpeg or the WAV reader can open as-is.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ResolutionError;

/// What a resolver found behind a locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedSource {
    pub stream_locator: String,
    pub title: String,
    pub duration: Option<Duration>,
}

pub trait SourceResolver: Send + Sync + 'static {
    fn resolve<'a>(
        &'a self,
        locator: &'a str,
    ) -> BoxFuture<'a, Result<ResolvedSource, ResolutionError>>;
}

/// Accepts local files and `http(s)` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectResolver;

impl DirectResolver {
    async fn resolve_file(path: PathBuf) -> Result<ResolvedSource, ResolutionError> {
        let display = path.display().to_string();
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|_| ResolutionError::NotFound(display.clone()))?;
        if !metadata.is_file() {
            return Err(ResolutionError::NotFound(display));
        }

        let title = path
            .file_stem()
            .map_or_else(|| display.clone(), |s| s.to_string_lossy().into_owned());

        let duration = if is_wav(&path) {
            let wav_path = path.clone();
            tokio::task::spawn_blocking(move || wav_duration(&wav_path))
                .await
                .map_err(|e| ResolutionError::Failed(e.to_string()))??
        } else {
            None
        };

        Ok(ResolvedSource {
            stream_locator: display,
            title,
            duration,
        })
    }

    fn resolve_url(url: &str) -> ResolvedSource {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let title = path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty() && !s.contains(':'))
            .unwrap_or(url)
            .to_string();
        ResolvedSource {
            stream_locator: url.to_string(),
            title,
            duration: None,
        }
    }
}

impl SourceResolver for DirectResolver {
    fn resolve<'a>(
        &'a self,
        locator: &'a str,
    ) -> BoxFuture<'a, Result<ResolvedSource, ResolutionError>> {
        async move {
            let locator = locator.trim();
            if locator.starts_with("http://") || locator.starts_with("https://") {
                return Ok(Self::resolve_url(locator));
            }
            let path = Path::new(locator);
            if path.is_absolute() || locator.starts_with('.') || path.extension().is_some() {
                return Self::resolve_file(path.to_path_buf()).await;
            }
            Err(ResolutionError::Unsupported(locator.to_string()))
        }
        .boxed()
    }
}

pub(crate) fn is_wav(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
}

fn wav_duration(path: &Path) -> Result<Option<Duration>, ResolutionError> {
    let reader =
        hound::WavReader::open(path).map_err(|e| ResolutionError::Failed(e.to_string()))?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return Ok(None);
    }
    let secs = f64::from(reader.duration()) / f64::from(spec.sample_rate);
    Ok(Some(Duration::from_secs_f64(secs)))
}

/// Rejects sources longer than `limit`. Live sources always pass.
///
/// # Errors
/// Returns [`ResolutionError::TooLong`] when the duration exceeds `limit`.
pub fn check_length(source: &ResolvedSource, limit: Duration) -> Result<(), ResolutionError> {
    match source.duration {
        Some(actual) if actual > limit => Err(ResolutionError::TooLong { actual, limit }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, seconds: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..8_000 * seconds {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[tokio::test]
    async fn resolves_wav_with_duration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("intro.wav");
        write_wav(&path, 2);

        let source = DirectResolver
            .resolve(path.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(source.title, "intro");
        assert_eq!(source.duration, Some(Duration::from_secs(2)));
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let err = DirectResolver
            .resolve("/definitely/not/here.mp3")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolutionError::NotFound(_)));
    }

    #[tokio::test]
    async fn urls_resolve_without_duration() {
        let source = DirectResolver
            .resolve("https://cdn.example.com/music/song.ogg?sig=abc")
            .await
            .unwrap();
        assert_eq!(source.title, "song.ogg");
        assert_eq!(source.duration, None);
        assert_eq!(
            source.stream_locator,
            "https://cdn.example.com/music/song.ogg?sig=abc"
        );
    }

    #[tokio::test]
    async fn search_terms_need_an_external_resolver() {
        let err = DirectResolver.resolve("never gonna give").await.unwrap_err();
        assert_eq!(
            err,
            ResolutionError::Unsupported("never gonna give".to_string())
        );
    }

    #[test]
    fn length_cap_spares_live_sources() {
        let limit = Duration::from_secs(60);
        let mut source = ResolvedSource {
            stream_locator: "x".into(),
            title: "x".into(),
            duration: None,
        };
        assert!(check_length(&source, limit).is_ok());
        source.duration = Some(Duration::from_secs(61));
        assert!(matches!(
            check_length(&source, limit),
            Err(ResolutionError::TooLong { .. })
        ));
    }
}
