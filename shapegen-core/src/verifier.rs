//! Asks the model whether a rendered image shows the requested shape.

use crate::error::Error;
use crate::executor::EncodedImage;
use crate::prompt::{verification_message, verification_prompt};
use crate::provider::{ChatMessage, CompletionRequest, LlmProvider, Usage};
use crate::shape::ShapeRequest;

/// A reply counts as a match iff it says "yes" somewhere, ignoring case.
pub fn is_affirmative(reply: &str) -> bool {
    reply.to_lowercase().contains("yes")
}

/// How the image travels to the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageDelivery {
    /// Base64 text appended to the question
    #[default]
    Inline,
    /// Base64 payload in the message `images` field (multimodal models)
    Attached,
}

/// Outcome of one verification attempt
#[derive(Debug)]
pub enum Verdict {
    /// Nothing was rendered; the model was not asked
    NoImage,
    /// The model answered
    Answered {
        valid: bool,
        model: String,
        usage: Usage,
    },
    /// The service call failed
    Failed(Error),
}

impl Verdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Answered { valid: true, .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Verifier {
    delivery: ImageDelivery,
}

impl Verifier {
    pub fn new(delivery: ImageDelivery) -> Self {
        Self { delivery }
    }

    pub fn build_request(&self, image: &EncodedImage, request: &ShapeRequest) -> CompletionRequest {
        let message = match self.delivery {
            ImageDelivery::Inline => ChatMessage::user(verification_message(request, image.as_base64())),
            ImageDelivery::Attached => {
                ChatMessage::user(verification_prompt(request)).with_image(image.as_base64())
            }
        };
        CompletionRequest::new(vec![message])
    }

    /// Ask the model about `image`. Service failures are reported and count
    /// as "not verified"; they never stop the caller.
    pub async fn verify<P: LlmProvider>(
        &self,
        provider: &P,
        image: Option<&EncodedImage>,
        request: &ShapeRequest,
    ) -> Verdict {
        let Some(image) = image else {
            return Verdict::NoImage;
        };

        match provider.complete(self.build_request(image, request)).await {
            Ok(response) => {
                let valid = is_affirmative(&response.content);
                tracing::debug!(valid, reply = %response.content, "verification reply");
                Verdict::Answered {
                    valid,
                    model: response.model,
                    usage: response.usage,
                }
            }
            Err(e) => {
                eprintln!("Error verifying image: {}", e);
                let err = e.into_error("verifier::verify");
                tracing::warn!(error = %err, "verification failed");
                Verdict::Failed(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{CompletionResponse, ProviderError};
    use crate::shape::{Color, Shape};
    use std::sync::Mutex;

    struct ScriptedProvider {
        reply: Result<&'static str, &'static str>,
        requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedProvider {
        fn replying(reply: &'static str) -> Self {
            Self { reply: Ok(reply), requests: Mutex::new(Vec::new()) }
        }

        fn failing(reason: &'static str) -> Self {
            Self { reply: Err(reason), requests: Mutex::new(Vec::new()) }
        }
    }

    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn default_model(&self) -> &str {
            "llama2"
        }

        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
            self.requests.lock().unwrap().push(request);
            match self.reply {
                Ok(content) => Ok(CompletionResponse {
                    model: "llama2".into(),
                    content: content.into(),
                    usage: Usage::default(),
                }),
                Err(reason) => Err(ProviderError::Network(reason.into())),
            }
        }
    }

    fn image() -> EncodedImage {
        EncodedImage::from_png(b"\x89PNG\r\n\x1a\n".to_vec())
    }

    #[test]
    fn test_is_affirmative() {
        assert!(is_affirmative("Yes, the red circle is present"));
        assert!(is_affirmative("YES"));
        assert!(!is_affirmative("No, this looks like a square"));
        assert!(!is_affirmative(""));
    }

    #[test]
    fn test_inline_request_carries_image_in_text() {
        let request = ShapeRequest::new(Shape::Circle, Color::Red);
        let completion = Verifier::new(ImageDelivery::Inline).build_request(&image(), &request);

        let message = &completion.messages[0];
        assert!(message.images.is_empty());
        assert!(message.content.contains("red circle"));
        assert!(message.content.ends_with(image().as_base64()));
    }

    #[test]
    fn test_attached_request_uses_images_field() {
        let request = ShapeRequest::new(Shape::Cube, Color::Blue);
        let completion = Verifier::new(ImageDelivery::Attached).build_request(&image(), &request);

        let message = &completion.messages[0];
        assert_eq!(message.content, verification_prompt(&request));
        assert_eq!(message.images, vec![image().as_base64().to_string()]);
    }

    #[test]
    fn test_no_image_skips_model() {
        let provider = ScriptedProvider::replying("Yes");
        let request = ShapeRequest::new(Shape::Square, Color::Green);

        let verdict = tokio_test::block_on(Verifier::default().verify(&provider, None, &request));
        assert!(matches!(verdict, Verdict::NoImage));
        assert!(!verdict.is_valid());
        assert!(provider.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_yes_and_no_replies() {
        let request = ShapeRequest::new(Shape::Circle, Color::Red);

        let provider = ScriptedProvider::replying("Yes, the red circle is present");
        let verdict = Verifier::default().verify(&provider, Some(&image()), &request).await;
        assert!(verdict.is_valid());

        let provider = ScriptedProvider::replying("No, this looks like a square");
        let verdict = Verifier::default().verify(&provider, Some(&image()), &request).await;
        assert!(!verdict.is_valid());
        assert!(matches!(verdict, Verdict::Answered { valid: false, .. }));
    }

    #[tokio::test]
    async fn test_service_failure_is_not_verified() {
        let provider = ScriptedProvider::failing("connection refused");
        let request = ShapeRequest::new(Shape::Sphere, Color::Yellow);

        let verdict = Verifier::default().verify(&provider, Some(&image()), &request).await;
        match verdict {
            Verdict::Failed(err) => {
                assert!(!err.is_fatal());
                assert_eq!(err.operation(), "verifier::verify");
            }
            other => panic!("unexpected verdict: {other:?}"),
        }
        assert_eq!(provider.requests.lock().unwrap().len(), 1);
    }
}
