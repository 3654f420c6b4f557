pub mod bottle;
pub mod friendship;
pub mod notification;
pub mod pour;
pub mod user;

pub use bottle::{
    AddToCollection, BottleStatus, CollectionItem, MasterBottle, NewMasterBottle, UserBottle,
    UserBottleUpdate, DEFAULT_VOLUME_ML,
};
pub use friendship::{Friend, Friendship, FriendshipStatus, IncomingRequest};
pub use notification::{
    Cooldown, InsertOutcome, Notification, NotificationDraft, NotificationPriority,
    NotificationType,
};
pub use pour::{NewPour, Pour, PourSession, PourSessionDetail, RecordedPour};
pub use user::{ProfileUpdate, PublicProfile, User};
