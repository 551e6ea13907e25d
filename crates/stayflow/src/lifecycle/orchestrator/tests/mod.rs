mod bookings;
mod common;
