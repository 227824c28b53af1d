mod choke;

pub use choke::ChokeScheduler;
