mod aggregate;
mod extremes;
mod helpers;
mod outage;
