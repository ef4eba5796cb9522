//! Prompt text sent to the model.

use crate::shape::ShapeRequest;

/// Instruction asking the model for plotting code
pub fn code_prompt(request: &ShapeRequest) -> String {
    format!(
        "Generate Python code using matplotlib to draw a {} {} in {}.",
        request.color(),
        request.shape(),
        request.dimensionality()
    )
}

/// Yes/no question about the rendered image
pub fn verification_prompt(request: &ShapeRequest) -> String {
    format!(
        "Verify if the image contains a {} {}. Respond with 'Yes' if correct, or 'No' with explanation if incorrect.",
        request.color(),
        request.shape()
    )
}

/// Verification question with the encoded image inlined in the text body
pub fn verification_message(request: &ShapeRequest, image_b64: &str) -> String {
    format!("{}\n\nImage: {}", verification_prompt(request), image_b64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::{Color, Shape};

    #[test]
    fn test_code_prompt() {
        let request = ShapeRequest::new(Shape::Circle, Color::Red);
        assert_eq!(
            code_prompt(&request),
            "Generate Python code using matplotlib to draw a red circle in 2D."
        );

        let request = ShapeRequest::new(Shape::Cube, Color::Orange);
        assert_eq!(
            code_prompt(&request),
            "Generate Python code using matplotlib to draw a orange cube in 3D."
        );
    }

    #[test]
    fn test_verification_prompt() {
        let request = ShapeRequest::new(Shape::Sphere, Color::Blue);
        let prompt = verification_prompt(&request);
        assert!(prompt.starts_with("Verify if the image contains a blue sphere."));
        assert!(prompt.contains("'Yes'"));
    }

    #[test]
    fn test_verification_message_inlines_image() {
        let request = ShapeRequest::new(Shape::Triangle, Color::Green);
        let message = verification_message(&request, "iVBORw0KGgo=");
        assert!(message.ends_with("\n\nImage: iVBORw0KGgo="));
        assert!(message.starts_with(&verification_prompt(&request)));
    }
}
