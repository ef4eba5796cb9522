//! Generator implementation - the sample, generate, render, verify loop

use futures_util::FutureExt;
use rand::rngs::StdRng;
use rand::SeedableRng;
use shapegen_core::{
    code_prompt, ChatMessage, CodeExecutor, CodeRunner, CompletionRequest, EncodedImage, Error,
    ImageDelivery, LlmProvider, Result, ShapeRequest, UsageTracker, Verdict, Verifier,
};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the generator
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Pause after every iteration, whatever its outcome
    pub delay: Duration,
    /// Stop after this many iterations; `None` runs until interrupted
    pub max_iterations: Option<u64>,
    /// Seed for the shape sampler; `None` seeds from entropy
    pub seed: Option<u64>,
    /// How the rendered image is handed to the verifier
    pub image_delivery: ImageDelivery,
    /// Also write each rendered PNG here
    pub save_dir: Option<PathBuf>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(5),
            max_iterations: None,
            seed: None,
            image_delivery: ImageDelivery::Inline,
            save_dir: None,
        }
    }
}

/// What one iteration produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Rendered and confirmed by the model
    Verified(ShapeRequest),
    /// Rendered, but the model did not confirm it
    Rejected(ShapeRequest),
    /// Code came back but nothing was rendered
    NoImage(ShapeRequest),
    /// The model returned no code
    NoCode(ShapeRequest),
}

impl Outcome {
    pub fn request(&self) -> &ShapeRequest {
        match self {
            Outcome::Verified(r) | Outcome::Rejected(r) | Outcome::NoImage(r) | Outcome::NoCode(r) => r,
        }
    }

    /// The console line reported for this outcome
    pub fn report_line(&self) -> String {
        match self {
            Outcome::Verified(r) => format!(
                "Successfully generated and verified a {} {} in {}.",
                r.color(),
                r.shape(),
                r.dimensionality()
            ),
            Outcome::Rejected(r) => format!(
                "Failed to generate a valid {} {}. Retrying...",
                r.color(),
                r.shape()
            ),
            Outcome::NoImage(_) => "Failed to generate image. Retrying...".to_string(),
            Outcome::NoCode(_) => "Failed to generate code. Retrying...".to_string(),
        }
    }
}

/// Running tally across iterations
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub iterations: u64,
    pub verified: u64,
    pub rejected: u64,
    pub no_image: u64,
    pub no_code: u64,
    pub unexpected: u64,
    pub usage: UsageTracker,
}

impl RunStats {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Verified(_) => self.verified += 1,
            Outcome::Rejected(_) => self.rejected += 1,
            Outcome::NoImage(_) => self.no_image += 1,
            Outcome::NoCode(_) => self.no_code += 1,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "Finished after {} iterations: {} verified, {} rejected, {} without image, {} without code, {} unexpected errors.",
            self.iterations, self.verified, self.rejected, self.no_image, self.no_code, self.unexpected
        )
    }
}

/// The coordinator - owns the model client, the executor and the random
/// source, and runs one iteration at a time.
pub struct Generator<P, R> {
    provider: P,
    executor: CodeExecutor<R>,
    verifier: Verifier,
    rng: StdRng,
    config: GeneratorConfig,
    stats: RunStats,
}

impl<P: LlmProvider, R: CodeRunner> Generator<P, R> {
    pub fn new(provider: P, runner: R, config: GeneratorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            provider,
            executor: CodeExecutor::new(runner),
            verifier: Verifier::new(config.image_delivery),
            rng,
            config,
            stats: RunStats::default(),
        }
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Draw a fresh shape request
    pub fn sample(&mut self) -> ShapeRequest {
        ShapeRequest::sample(&mut self.rng)
    }

    /// Ask the model for plotting code.
    ///
    /// Service failures are reported and yield `Ok(None)`. A missing model is
    /// the one error returned: retrying cannot fix it.
    pub async fn generate_code(&mut self, request: &ShapeRequest) -> Result<Option<String>> {
        let completion = CompletionRequest::new(vec![ChatMessage::user(code_prompt(request))]);

        match self.provider.complete(completion).await {
            Ok(response) => {
                self.stats.usage.track(&response.model, &response.usage);
                tracing::debug!(chars = response.content.len(), "code generated");
                if response.content.trim().is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(response.content))
                }
            }
            Err(e) if e.is_model_not_found() => {
                eprintln!("Error generating code: {}", e);
                let model = self.provider.default_model().to_string();
                eprintln!(
                    "The {model} model is not installed. Please run 'ollama pull {model}' to install it."
                );
                Err(e.into_error("generator::generate_code"))
            }
            Err(e) => {
                eprintln!("Error generating code: {}", e);
                tracing::warn!(error = %e.into_error("generator::generate_code"), "code generation failed");
                Ok(None)
            }
        }
    }

    /// One full iteration: sample, generate, execute, verify.
    ///
    /// A missing step short-circuits to the outcome; later steps are skipped.
    pub async fn generate_and_verify(&mut self) -> Result<Outcome> {
        let request = self.sample();
        tracing::info!(iteration = self.stats.iterations, %request, "starting iteration");

        let Some(code) = self.generate_code(&request).await? else {
            return Ok(Outcome::NoCode(request));
        };

        let Some(image) = self.executor.execute(Some(code.as_str())).await else {
            return Ok(Outcome::NoImage(request));
        };
        self.save_image(&request, &image).await;

        let verdict = self.verifier.verify(&self.provider, Some(&image), &request).await;
        if let Verdict::Answered { model, usage, .. } = &verdict {
            self.stats.usage.track(model, usage);
        }

        if verdict.is_valid() {
            Ok(Outcome::Verified(request))
        } else {
            Ok(Outcome::Rejected(request))
        }
    }

    async fn save_image(&self, request: &ShapeRequest, image: &EncodedImage) {
        let Some(dir) = &self.config.save_dir else {
            return;
        };
        let path = dir.join(format!(
            "{:04}-{}-{}-{}.png",
            self.stats.iterations,
            request.color(),
            request.shape(),
            request.dimensionality().as_str().to_lowercase()
        ));

        if let Err(e) = tokio::fs::create_dir_all(dir).await {
            tracing::warn!(dir = %dir.display(), error = %Error::from(e), "cannot create save dir");
            return;
        }
        match tokio::fs::write(&path, image.png_bytes()).await {
            Ok(()) => tracing::debug!(path = %path.display(), "saved rendered image"),
            Err(e) => tracing::warn!(path = %path.display(), error = %Error::from(e), "cannot save image"),
        }
    }

    /// Run one iteration with loop-level recovery, then wait out the delay.
    ///
    /// Only a fatal error is returned.
    async fn iterate(&mut self) -> Result<()> {
        self.stats.iterations += 1;

        match AssertUnwindSafe(self.generate_and_verify()).catch_unwind().await {
            Ok(Ok(outcome)) => {
                self.stats.record(&outcome);
                println!("{}", outcome.report_line());
            }
            Ok(Err(e)) if e.is_fatal() => return Err(e),
            Ok(Err(e)) => {
                self.stats.unexpected += 1;
                eprintln!("An unexpected error occurred: {}", e);
            }
            Err(panic) => {
                self.stats.unexpected += 1;
                let err = Error::unexpected(panic_message(panic.as_ref()))
                    .with_operation("generator::iterate");
                tracing::error!(error = %err, "iteration panicked");
                eprintln!("An unexpected error occurred: {}", err.message());
            }
        }

        if !self.reached_limit() {
            tokio::time::sleep(self.config.delay).await;
        }
        Ok(())
    }

    fn reached_limit(&self) -> bool {
        self.config
            .max_iterations
            .is_some_and(|max| self.stats.iterations >= max)
    }

    /// Loop until `shutdown` resolves, the iteration limit is hit, or the
    /// model turns out to be missing.
    ///
    /// An in-flight iteration is dropped when `shutdown` fires, which cancels
    /// the pending request and kills any running script.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<RunStats>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        while !self.reached_limit() {
            let interrupted = tokio::select! {
                biased;
                _ = &mut shutdown => true,
                result = self.iterate() => {
                    result?;
                    false
                }
            };

            if interrupted {
                println!("\nProgram terminated by user.");
                break;
            }
        }

        tracing::info!(
            iterations = self.stats.iterations,
            verified = self.stats.verified,
            tokens = self.stats.usage.total_tokens(),
            "run finished"
        );
        Ok(self.stats.clone())
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
