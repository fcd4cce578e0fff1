use uuid::Uuid;

/// Reference data for a bookable destination. Read-only for the engine.
#[derive(Clone, Debug)]
pub struct Destination {
    pub id: Uuid,
    pub name: String,

    /// Undiscounted per-person price.
    pub base_price: f64,

    /// Ceiling on the effective discount rate, whatever the tier says.
    pub max_discount: f64,

    pub is_active: bool,
}
