/// Issues a new lineage token for a task.
///
/// Called whenever a task starts, restarts or is edited. The value comes from
/// the thread-local CSPRNG; collisions are not guarded against.
pub fn create_id() -> i32 {
    rand::random::<i32>()
}
