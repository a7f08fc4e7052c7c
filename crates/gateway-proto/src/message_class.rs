//! Classification of `message_type` values into routing classes.

/// The class a frame's `message_type` falls into, per §3's numeric ranges.
///
/// Classification drives both the auth gate (everything but `SystemAuth`
/// requires an authenticated connection) and pool routing in the dispatcher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageClass {
    /// 1-100. Never auth-gated; this is the class auth frames themselves use.
    SystemAuth,
    /// 101-200.
    Player,
    /// 201-300.
    Chat,
    /// 301-400.
    Bag,
    /// 401-500.
    Battle,
    /// 501-600.
    Guild,
    /// 601-700.
    Activity,
    /// 9001-9999. Reserved for server-originated error frames.
    Error,
    /// Outside every known range. Always fails the auth gate and routing.
    Unknown,
}

impl MessageClass {
    /// Classifies a raw `message_type` value per §3.
    pub fn of(message_type: i32) -> Self {
        match message_type {
            1..=100 => Self::SystemAuth,
            101..=200 => Self::Player,
            201..=300 => Self::Chat,
            301..=400 => Self::Bag,
            401..=500 => Self::Battle,
            501..=600 => Self::Guild,
            601..=700 => Self::Activity,
            9001..=9999 => Self::Error,
            _ => Self::Unknown,
        }
    }

    /// Whether frames of this class may pass the auth gate unauthenticated.
    pub fn is_auth_exempt(self) -> bool {
        matches!(self, Self::SystemAuth)
    }

    /// The downstream pool this class routes to, if any.
    ///
    /// `Error` and `Unknown` never route; `Error` frames are server-originated
    /// and `Unknown` frames have no configured destination.
    pub fn pool_name(self) -> Option<&'static str> {
        match self {
            Self::Player | Self::Bag | Self::Battle | Self::Activity => Some("logic"),
            Self::Chat | Self::Guild => Some("chat"),
            Self::SystemAuth => None,
            Self::Error | Self::Unknown => None,
        }
    }
}
