pub mod holder;
pub mod order;
pub mod seat;
pub mod showtime;

pub use holder::HolderToken;
pub use order::{BuyerInfo, Order, OrderStatus, PaymentMethod, Ticket};
pub use seat::{group_by_row, Seat, SeatCategory, SeatMap, SeatRecord, SeatState, SeatStatus, SeatWrite, ShowtimeSeat};
pub use showtime::Showtime;
