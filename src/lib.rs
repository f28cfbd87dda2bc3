pub mod buffer;
pub mod collective;
pub mod config;
pub mod error;
mod reduce;
pub mod sync;
pub mod types;

pub use buffer::TensorBuffer;
pub use collective::{
    AllGather, AllReduce, Collective, CollectiveOperation, CombineFn, ConcatGather,
    ElementwiseReduce, GatherFn, HostBackend, NativeAllGather, NativeAllReduce, NativeBackend,
    ReduceFn, ScatterReduce,
};
pub use config::LockstepConfig;
pub use error::{LockstepError, Result};
pub use sync::{ReadySignal, Rendezvous, WaitError};
pub use types::{DataType, Rank, ReduceOp};
