//! Shape requests and the sampler that draws them.

use rand::Rng;
use std::fmt;

/// Whether the shape is drawn on flat or 3D axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimensionality {
    Two,
    Three,
}

impl Dimensionality {
    pub const ALL: [Dimensionality; 2] = [Dimensionality::Two, Dimensionality::Three];

    pub fn as_str(&self) -> &'static str {
        match self {
            Dimensionality::Two => "2D",
            Dimensionality::Three => "3D",
        }
    }

    /// Shapes that make sense for this dimensionality
    pub fn shapes(&self) -> &'static [Shape; 3] {
        match self {
            Dimensionality::Two => &Shape::FLAT,
            Dimensionality::Three => &Shape::SOLID,
        }
    }
}

impl fmt::Display for Dimensionality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shape {
    Circle,
    Square,
    Triangle,
    Sphere,
    Cube,
    Tetrahedron,
}

impl Shape {
    pub const FLAT: [Shape; 3] = [Shape::Circle, Shape::Square, Shape::Triangle];
    pub const SOLID: [Shape; 3] = [Shape::Sphere, Shape::Cube, Shape::Tetrahedron];

    pub fn as_str(&self) -> &'static str {
        match self {
            Shape::Circle => "circle",
            Shape::Square => "square",
            Shape::Triangle => "triangle",
            Shape::Sphere => "sphere",
            Shape::Cube => "cube",
            Shape::Tetrahedron => "tetrahedron",
        }
    }

    pub fn dimensionality(&self) -> Dimensionality {
        match self {
            Shape::Circle | Shape::Square | Shape::Triangle => Dimensionality::Two,
            Shape::Sphere | Shape::Cube | Shape::Tetrahedron => Dimensionality::Three,
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    Red,
    Green,
    Blue,
    Yellow,
    Purple,
    Orange,
}

impl Color {
    pub const ALL: [Color; 6] = [
        Color::Red,
        Color::Green,
        Color::Blue,
        Color::Yellow,
        Color::Purple,
        Color::Orange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Color::Red => "red",
            Color::Green => "green",
            Color::Blue => "blue",
            Color::Yellow => "yellow",
            Color::Purple => "purple",
            Color::Orange => "orange",
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The (dimensionality, shape, color) that drives one loop iteration.
///
/// Built only through [`ShapeRequest::sample`] or [`ShapeRequest::new`], so
/// the shape always belongs to the dimensionality's set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShapeRequest {
    dimensionality: Dimensionality,
    shape: Shape,
    color: Color,
}

impl ShapeRequest {
    /// Build a request for a known shape; dimensionality follows the shape.
    pub fn new(shape: Shape, color: Color) -> Self {
        Self {
            dimensionality: shape.dimensionality(),
            shape,
            color,
        }
    }

    /// Draw dimensionality, then a shape of that dimensionality, then a color,
    /// each uniformly and independently.
    pub fn sample<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let dimensionality = Dimensionality::ALL[rng.gen_range(0..Dimensionality::ALL.len())];
        let shapes = dimensionality.shapes();
        let shape = shapes[rng.gen_range(0..shapes.len())];
        let color = Color::ALL[rng.gen_range(0..Color::ALL.len())];

        Self {
            dimensionality,
            shape,
            color,
        }
    }

    pub fn dimensionality(&self) -> Dimensionality {
        self.dimensionality
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn is_3d(&self) -> bool {
        self.dimensionality == Dimensionality::Three
    }
}

impl fmt::Display for ShapeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} in {}", self.color, self.shape, self.dimensionality)
    }
}
