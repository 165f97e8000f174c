//! Scripted collaborators for pipeline tests.
//!
//! Downloaded "images" are small text payloads such as `id=jane;faces=1`.
//! The detector reads the face count and the verifier compares ids, so a
//! test describes each candidate by who is in it and how many faces it has.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::download::{write_complete, Fetcher};
use crate::error::{DownloadError, SearchError};
use crate::faces::{
    DemographyClassifier, FaceDetector, FaceRegion, FaceVerifier, RaceAnalysis, RaceScores,
    Verification, VerifyOptions,
};
use crate::search::{ImageResult, ImageSearch, SearchResults};

/// Search results plus the bytes served for each URL.
#[derive(Debug, Clone, Default)]
pub struct StubWeb {
    pub results: Vec<ImageResult>,
    pub payloads: HashMap<String, String>,
}

impl StubWeb {
    pub fn new() -> Self {
        Self::default()
    }

    fn urls(&self) -> (String, String) {
        let n = self.results.len();
        (
            format!("https://img.test/{n}/thumb"),
            format!("https://img.test/{n}/full"),
        )
    }

    fn push(mut self, thumbnail: Option<String>, image: Option<String>) -> Self {
        let (thumb_url, image_url) = self.urls();
        if let Some(body) = thumbnail {
            self.payloads.insert(thumb_url.clone(), body);
        }
        if let Some(body) = image {
            self.payloads.insert(image_url.clone(), body);
        }
        self.results.push(ImageResult {
            thumbnail: thumb_url,
            image: image_url,
            title: String::new(),
            url: String::new(),
        });
        self
    }

    /// A candidate served from its thumbnail URL.
    pub fn candidate(self, person: &str, faces: usize) -> Self {
        let body = payload(person, faces);
        self.push(Some(body), None)
    }

    /// A candidate whose thumbnail is gone but whose full image downloads.
    pub fn full_size_only(self, person: &str, faces: usize) -> Self {
        let body = payload(person, faces);
        self.push(None, Some(body))
    }

    /// A candidate where both URLs fail.
    pub fn unreachable(self) -> Self {
        self.push(None, None)
    }

    /// A candidate that downloads but cannot be decoded.
    pub fn corrupt(self) -> Self {
        self.push(Some("corrupt".to_string()), None)
    }
}

pub fn payload(person: &str, faces: usize) -> String {
    format!("id={person};faces={faces}")
}

fn field<'a>(body: &'a str, key: &str) -> Option<&'a str> {
    body.split(';')
        .filter_map(|part| part.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

pub struct StubSearch {
    results: Vec<ImageResult>,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
    pulled: Arc<AtomicUsize>,
}

impl StubSearch {
    pub fn new(web: &StubWeb) -> Self {
        Self {
            results: web.results.clone(),
            failures_left: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            pulled: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Fail the next `n` queries.
    pub fn failing(self, n: usize) -> Self {
        self.failures_left.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Results handed out across all queries.
    pub fn pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }
}

impl ImageSearch for StubSearch {
    fn search(&self, _query: &str) -> Result<SearchResults<'_>, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SearchError::Http("stub outage".to_string()));
        }

        let pulled = self.pulled.clone();
        Ok(Box::new(self.results.clone().into_iter().inspect(move |_| {
            pulled.fetch_add(1, Ordering::SeqCst);
        })))
    }

    fn provider_name(&self) -> &'static str {
        "stub"
    }
}

pub struct StubFetcher {
    payloads: HashMap<String, String>,
}

impl StubFetcher {
    pub fn new(web: &StubWeb) -> Self {
        Self {
            payloads: web.payloads.clone(),
        }
    }
}

impl Fetcher for StubFetcher {
    fn fetch(&self, url: &str, dest: &Path) -> Result<u64, DownloadError> {
        let body = self.payloads.get(url).ok_or_else(|| DownloadError::Http {
            url: url.to_string(),
            message: "404 Not Found".to_string(),
        })?;
        write_complete(url, body.as_bytes(), dest)
    }
}

pub struct StubDetector;

impl FaceDetector for StubDetector {
    fn detect(&self, image_path: &Path) -> Result<Vec<FaceRegion>> {
        let body = std::fs::read_to_string(image_path)?;
        let faces: usize = field(&body, "faces")
            .ok_or_else(|| anyhow!("cannot decode {:?}", image_path))?
            .parse()?;

        Ok((0..faces)
            .map(|i| FaceRegion {
                x: i as i32 * 10,
                y: 0,
                width: 10,
                height: 10,
                confidence: 0.9,
            })
            .collect())
    }

}

/// Two images match when their payloads name the same person.
pub struct StubVerifier;

impl FaceVerifier for StubVerifier {
    fn verify(&self, image_a: &Path, image_b: &Path, options: &VerifyOptions) -> Result<Verification> {
        let a = std::fs::read_to_string(image_a)?;
        let b = std::fs::read_to_string(image_b)?;
        let same = field(&a, "id").is_some() && field(&a, "id") == field(&b, "id");

        Ok(Verification {
            verified: same,
            distance: if same { 0.1 } else { 0.9 },
            threshold: 0.55,
            model: options.model.clone(),
            detector_backend: options.detector_backend.clone(),
            metric: options.metric,
        })
    }
}

/// Every image scores "white" highest.
pub struct StubClassifier;

impl DemographyClassifier for StubClassifier {
    fn analyze(&self, image_path: &Path, _detector_backend: &str) -> Result<RaceAnalysis> {
        let body = std::fs::read_to_string(image_path)?;
        if field(&body, "id").is_none() {
            return Err(anyhow!("cannot decode {:?}", image_path));
        }
        Ok(RaceAnalysis::from_scores(RaceScores::new([
            10.0, 5.0, 5.0, 60.0, 10.0, 10.0,
        ])))
    }
}

fn missing_model(file: &str) -> anyhow::Error {
    anyhow!("Model file \"{file}\" not found; place the ONNX export there")
}

/// A verifier whose model file was never installed.
pub struct MissingModelVerifier;

impl FaceVerifier for MissingModelVerifier {
    fn verify(&self, _image_a: &Path, _image_b: &Path, _options: &VerifyOptions) -> Result<Verification> {
        Err(missing_model("facenet.onnx"))
    }

    fn prepare(&self, _options: &VerifyOptions) -> Result<()> {
        Err(missing_model("facenet.onnx"))
    }
}

/// A classifier whose model file was never installed.
pub struct MissingModelClassifier;

impl DemographyClassifier for MissingModelClassifier {
    fn analyze(&self, _image_path: &Path, _detector_backend: &str) -> Result<RaceAnalysis> {
        Err(missing_model("race.onnx"))
    }

    fn prepare(&self, _detector_backend: &str) -> Result<()> {
        Err(missing_model("race.onnx"))
    }
}
