mod daily;
mod helpers;
mod hourly;
mod service;
