//! The fiberio self-test matrix.
//!
//! Runs every suite in order and prints either the first failing assertion as
//! `FUNCTION: ASSERT(expr) failed: message` or the literal `ALL TESTS
//! PASSED`. The exit status is 0 in both cases; the output line is the
//! verdict.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

use fiberio::event::Event;
use fiberio::fiber::{self, Fiber};
use fiberio::mutex::Mutex;
use fiberio::pool::Pool;
use fiberio::queue::{BlockingQueue, BlockingStack};
use fiberio::rpc::{Client, Interface, Method, Param, Server, ServerParams, Value, WireType};
use fiberio::semaphore::Semaphore;
use fiberio::{worker, Runtime};

type TestResult = Result<(), String>;

macro_rules! function {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = type_name_of(f).trim_end_matches("::f");
        name.rsplit("::").next().unwrap_or(name)
    }};
}

macro_rules! check {
    ($cond:expr, $msg:expr) => {
        if !($cond) {
            return Err(format!(
                "{}: ASSERT({}) failed: {}",
                function!(),
                stringify!($cond),
                $msg
            ));
        }
    };
}

const TICK: Duration = Duration::from_millis(1);

fn main() {
    env_logger::init();
    match run_all_tests() {
        Err(msg) => println!("{}", msg),
        Ok(()) => println!("ALL TESTS PASSED"),
    }
}

fn run_all_tests() -> TestResult {
    core_all()?;
    fiber_all()?;
    event_all()?;
    mutex_all()?;
    semaphore_all()?;
    blocking_queue_all()?;
    blocking_stack_all()?;
    pool_all()?;
    rpc_all()?;
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////
// core
////////////////////////////////////////////////////////////////////////////////

fn core_init() -> TestResult {
    Runtime::new().shutdown();
    Ok(())
}

fn core_init_multiple() -> TestResult {
    for _ in 0..10 {
        core_init()?;
    }
    Ok(())
}

fn core_sleep() -> TestResult {
    let rt = Runtime::new();
    fiber::sleep(Duration::from_millis(100));
    rt.shutdown();
    Ok(())
}

fn core_sleep_multiple() -> TestResult {
    let rt = Runtime::new();
    for i in 0..10 {
        fiber::sleep(Duration::from_millis(i * 10 + 1));
    }
    rt.shutdown();
    Ok(())
}

fn core_threadpool_execute() -> TestResult {
    let rt = Runtime::new();
    let a = 1234;
    let b = worker::execute(|| a + 1);
    check!(b == a + 1, "unexpected result");
    rt.shutdown();
    Ok(())
}

fn core_threadpool_execute_multiple() -> TestResult {
    let rt = Runtime::new();
    for i in 0..10 {
        let a = i;
        let b = worker::execute(|| a + 1);
        check!(b == a + 1, "unexpected result");
    }
    rt.shutdown();
    Ok(())
}

fn core_fiberpool_execute() -> TestResult {
    let a = Rc::new(Cell::new(0));
    let rt = Runtime::new();
    {
        let a = Rc::clone(&a);
        fiber::execute_async(move || a.set(a.get() + 1));
    }
    rt.shutdown();
    check!(a.get() == 1, "unexpected result");
    Ok(())
}

fn core_fiberpool_execute_multiple() -> TestResult {
    let a = Rc::new(Cell::new(0));
    let rt = Runtime::new();
    for _ in 0..10 {
        let a = Rc::clone(&a);
        fiber::execute_async(move || a.set(a.get() + 1));
    }
    rt.shutdown();
    check!(a.get() == 10, "unexpected result");
    Ok(())
}

fn core_all() -> TestResult {
    core_init()?;
    core_init_multiple()?;
    core_sleep()?;
    core_sleep_multiple()?;
    core_threadpool_execute()?;
    core_threadpool_execute_multiple()?;
    core_fiberpool_execute()?;
    core_fiberpool_execute_multiple()?;
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////
// fiber
////////////////////////////////////////////////////////////////////////////////

fn fiber_create_delete() -> TestResult {
    let rt = Runtime::new();
    let fiber = Fiber::new("unused", || {});
    drop(fiber);
    rt.shutdown();
    Ok(())
}

fn fiber_start_join() -> TestResult {
    let rt = Runtime::new();
    let a = Rc::new(Cell::new(0));
    let mut fiber = {
        let a = Rc::clone(&a);
        fiber::Builder::new()
            .name("incr")
            .stack_size(0x100000)
            .proc(move || a.set(a.get() + 1))
            .build()
    };
    fiber.start();
    fiber.join();
    check!(a.get() == 1, "unexpected result");
    rt.shutdown();
    Ok(())
}

fn fiber_start_multiple() -> TestResult {
    let rt = Runtime::new();
    let a = Rc::new(Cell::new(0));
    let mut fibers = Vec::new();
    for _ in 0..10 {
        let a = Rc::clone(&a);
        fibers.push(Fiber::new("incr", move || a.set(a.get() + 1)));
    }
    for fiber in &mut fibers {
        fiber.start();
    }
    for fiber in fibers {
        fiber.join();
    }
    check!(a.get() == 10, "unexpected result");
    rt.shutdown();
    Ok(())
}

fn fiber_all() -> TestResult {
    fiber_create_delete()?;
    fiber_start_join()?;
    fiber_start_multiple()?;
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////
// event
////////////////////////////////////////////////////////////////////////////////

fn event_manual_create_delete() -> TestResult {
    let rt = Runtime::new();
    let event = Event::manual();
    drop(event);
    rt.shutdown();
    Ok(())
}

fn event_auto_create_delete() -> TestResult {
    let rt = Runtime::new();
    let event = Event::auto();
    drop(event);
    rt.shutdown();
    Ok(())
}

fn event_manual_basic() -> TestResult {
    let rt = Runtime::new();
    let event = Rc::new(Event::manual());
    check!(!event.is_set(), "initial event state should be 'not set'");
    {
        let event = Rc::clone(&event);
        fiber::execute_async(move || event.set());
    }
    event.wait();
    check!(event.is_set(), "event should be set by the setter fiber");
    event.wait();
    check!(event.is_set(), "manual event should remain set after wait");
    event.set();
    check!(event.is_set(), "event should be set after set");
    event.reset();
    check!(!event.is_set(), "event should be reset by reset");
    event.reset();
    check!(!event.is_set(), "event should remain reset");
    rt.shutdown();
    Ok(())
}

fn event_auto_basic() -> TestResult {
    let rt = Runtime::new();
    let event = Rc::new(Event::auto());
    check!(!event.is_set(), "initial event state should be 'not set'");
    {
        let event = Rc::clone(&event);
        fiber::execute_async(move || event.set());
    }
    event.wait();
    check!(
        !event.is_set(),
        "autoreset event should be 'not set' after wait"
    );
    event.set();
    check!(event.is_set(), "event should be set after set");
    event.set();
    check!(event.is_set(), "event should remain set after set");
    event.reset();
    check!(!event.is_set(), "event should be 'not set' after reset");
    event.reset();
    check!(!event.is_set(), "event should remain 'not set' after reset");
    rt.shutdown();
    Ok(())
}

fn event_manual_timeout() -> TestResult {
    let rt = Runtime::new();
    let event = Event::manual();
    let is_success = event.wait_timeout(Duration::from_millis(100));
    check!(!is_success, "event should timeout");
    check!(!event.is_set(), "event should remain 'not set' after timeout");
    event.set();
    let is_success = event.wait_timeout(Duration::from_millis(100));
    check!(is_success, "event shouldn't timeout");
    check!(
        event.is_set(),
        "manual event should remain set after wait_timeout"
    );
    rt.shutdown();
    Ok(())
}

fn event_auto_timeout() -> TestResult {
    let rt = Runtime::new();
    let event = Event::auto();
    let is_success = event.wait_timeout(Duration::from_millis(100));
    check!(!is_success, "event should timeout");
    check!(!event.is_set(), "event should remain 'not set' after timeout");
    event.set();
    let is_success = event.wait_timeout(Duration::from_millis(100));
    check!(is_success, "event shouldn't timeout");
    check!(
        !event.is_set(),
        "auto reset event should be 'not set' after wait_timeout"
    );
    rt.shutdown();
    Ok(())
}

fn spawn_event_waiters(event: &Rc<Event>, done_event: &Rc<Event>, a: &Rc<Cell<i32>>, count: i32) {
    for _ in 0..count {
        let event = Rc::clone(event);
        let done_event = Rc::clone(done_event);
        let a = Rc::clone(a);
        fiber::execute_async(move || {
            event.wait();
            a.set(a.get() + 1);
            if a.get() == count {
                done_event.set();
            }
        });
    }
}

fn event_manual_multiple() -> TestResult {
    let rt = Runtime::new();
    let event = Rc::new(Event::manual());
    let done_event = Rc::new(Event::manual());
    let a = Rc::new(Cell::new(0));
    spawn_event_waiters(&event, &done_event, &a, 15);
    check!(a.get() == 0, "a shouldn't change while event isn't set");
    event.set();
    done_event.wait();
    check!(a.get() == 15, "a should be 15 after done_event is set");
    rt.shutdown();
    Ok(())
}

fn event_auto_multiple() -> TestResult {
    let rt = Runtime::new();
    let event = Rc::new(Event::auto());
    let done_event = Rc::new(Event::manual());
    let a = Rc::new(Cell::new(0));
    spawn_event_waiters(&event, &done_event, &a, 15);
    check!(a.get() == 0, "a shouldn't change while event isn't set");
    for _ in 0..14 {
        event.set();
        let is_success = done_event.wait_timeout(TICK);
        check!(!is_success, "done_event should remain 'not set'");
    }
    event.set();
    done_event.wait();
    check!(a.get() == 15, "a should have value 15 after done_event set");
    rt.shutdown();
    Ok(())
}

fn event_all() -> TestResult {
    event_manual_create_delete()?;
    event_auto_create_delete()?;
    event_manual_basic()?;
    event_auto_basic()?;
    event_manual_timeout()?;
    event_auto_timeout()?;
    event_manual_multiple()?;
    event_auto_multiple()?;
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////
// mutex
////////////////////////////////////////////////////////////////////////////////

fn mutex_create_delete() -> TestResult {
    let rt = Runtime::new();
    let mutex = Mutex::new(0);
    drop(mutex);
    rt.shutdown();
    Ok(())
}

fn mutex_basic() -> TestResult {
    let rt = Runtime::new();
    let mutex = Rc::new(Mutex::new(0));
    let event = Rc::new(Event::auto());
    drop(mutex.lock());

    {
        let mutex = Rc::clone(&mutex);
        let event = Rc::clone(&event);
        fiber::execute_async(move || {
            let mut guard = mutex.lock();
            *guard = 123;
            event.set();
            fiber::sleep(Duration::from_millis(100));
            *guard = 10;
        });
    }
    event.wait();
    check!(
        mutex.try_lock().is_none(),
        "the locker fiber should hold the mutex while it sleeps"
    );
    let guard = mutex.lock();
    check!(
        *guard == 10,
        "a should be 10, because the locker fiber unlocks after its sleep"
    );
    drop(guard);

    rt.shutdown();
    Ok(())
}

fn mutex_all() -> TestResult {
    mutex_create_delete()?;
    mutex_basic()?;
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////
// semaphore
////////////////////////////////////////////////////////////////////////////////

fn semaphore_create_delete() -> TestResult {
    let rt = Runtime::new();
    let semaphore = Semaphore::new(0);
    drop(semaphore);
    rt.shutdown();
    Ok(())
}

fn semaphore_basic() -> TestResult {
    let rt = Runtime::new();
    let semaphore = Semaphore::new(0);
    let is_success = semaphore.down_timeout(TICK);
    check!(!is_success, "semaphore with 0 value cannot be down");
    for _ in 0..10 {
        semaphore.up();
    }
    let is_success = semaphore.down_timeout(TICK);
    check!(is_success, "semaphore should be down");
    for _ in 0..9 {
        semaphore.down();
    }
    let is_success = semaphore.down_timeout(TICK);
    check!(!is_success, "semaphore cannot be down");
    rt.shutdown();
    Ok(())
}

fn semaphore_all() -> TestResult {
    semaphore_create_delete()?;
    semaphore_basic()?;
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////
// blocking queue
////////////////////////////////////////////////////////////////////////////////

fn blocking_queue_create_delete() -> TestResult {
    let rt = Runtime::new();
    let queue = BlockingQueue::<i32>::new(10);
    drop(queue);
    rt.shutdown();
    Ok(())
}

fn blocking_queue_basic() -> TestResult {
    let rt = Runtime::new();
    let queue = BlockingQueue::new(10);
    for i in 0..10 {
        queue.put(i);
    }
    let is_success = queue.put_timeout(123, TICK).is_ok();
    check!(!is_success, "queue should be full");
    for i in 0..10 {
        let data = queue.take();
        check!(data == i, "wrong value received from the queue");
    }
    let is_success = queue.take_timeout(TICK).is_some();
    check!(!is_success, "queue should be empty");
    rt.shutdown();
    Ok(())
}

fn blocking_queue_fiberpool() -> TestResult {
    let rt = Runtime::new();
    let queue = Rc::new(BlockingQueue::new(1));
    let is_success = queue.take_timeout(TICK).is_some();
    check!(!is_success, "queue should be empty");
    {
        let queue = Rc::clone(&queue);
        fiber::execute_async(move || queue.put(543));
    }
    let data = queue.take();
    check!(data == 543, "unexpected value received from the queue");
    let is_success = queue.take_timeout(TICK).is_some();
    check!(!is_success, "queue shouldn't have values");
    rt.shutdown();
    Ok(())
}

fn blocking_queue_all() -> TestResult {
    blocking_queue_create_delete()?;
    blocking_queue_basic()?;
    blocking_queue_fiberpool()?;
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////
// blocking stack
////////////////////////////////////////////////////////////////////////////////

fn blocking_stack_create_delete() -> TestResult {
    let rt = Runtime::new();
    let stack = BlockingStack::<i32>::new(10);
    drop(stack);
    rt.shutdown();
    Ok(())
}

fn blocking_stack_basic() -> TestResult {
    let rt = Runtime::new();
    let stack = BlockingStack::new(10);
    for i in 0..10 {
        stack.push(i);
    }
    let is_success = stack.push_timeout(1234, TICK).is_ok();
    check!(!is_success, "stack should be full");
    for i in (0..10).rev() {
        let data = stack.pop();
        check!(data == i, "wrong value retrieved from the stack");
    }
    let is_success = stack.pop_timeout(TICK).is_some();
    check!(!is_success, "stack should be empty");
    rt.shutdown();
    Ok(())
}

fn blocking_stack_fiberpool() -> TestResult {
    let rt = Runtime::new();
    let stack = Rc::new(BlockingStack::new(1));
    let is_success = stack.pop_timeout(TICK).is_some();
    check!(!is_success, "stack should be empty");
    {
        let stack = Rc::clone(&stack);
        fiber::execute_async(move || stack.push(543));
    }
    let data = stack.pop();
    check!(data == 543, "unexpected value received from the stack");
    let is_success = stack.pop_timeout(TICK).is_some();
    check!(!is_success, "stack shouldn't have values");
    rt.shutdown();
    Ok(())
}

fn blocking_stack_all() -> TestResult {
    blocking_stack_create_delete()?;
    blocking_stack_basic()?;
    blocking_stack_fiberpool()?;
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////
// pool
////////////////////////////////////////////////////////////////////////////////

fn counting_pool(capacity: usize, entries_cnt: &Rc<Cell<i32>>) -> Pool<i32> {
    let entries_cnt = Rc::clone(entries_cnt);
    Pool::new(capacity, move || {
        entries_cnt.set(entries_cnt.get() + 1);
        123
    })
}

fn pool_create_delete() -> TestResult {
    let rt = Runtime::new();
    let entries_cnt = Rc::new(Cell::new(0));
    let pool = counting_pool(10, &entries_cnt);
    check!(entries_cnt.get() == 0, "pool should be empty after creation");
    drop(pool);
    check!(entries_cnt.get() == 0, "pool should be empty after deletion");
    rt.shutdown();
    Ok(())
}

fn pool_basic() -> TestResult {
    let rt = Runtime::new();
    let entries_cnt = Rc::new(Cell::new(0));
    let pool = counting_pool(10, &entries_cnt);
    let mut items = Vec::new();
    for i in 0..10 {
        let entry = pool.acquire();
        check!(*entry == 123, "unexpected value for the entry");
        check!(
            entries_cnt.get() == i + 1,
            "unexpected entries number"
        );
        items.push(entry);
    }
    for entry in items {
        pool.release(entry);
    }
    drop(pool);
    rt.shutdown();
    Ok(())
}

fn pool_fiberpool() -> TestResult {
    let rt = Runtime::new();
    let entries_cnt = Rc::new(Cell::new(0));
    let pool = Rc::new(counting_pool(1, &entries_cnt));
    check!(entries_cnt.get() == 0, "pool should be empty after creation");
    let entry = pool.acquire();
    check!(*entry == 123, "unexpected value received from the pool");
    check!(entries_cnt.get() == 1, "pool should create one entry");
    {
        let pool = Rc::clone(&pool);
        fiber::execute_async(move || pool.release(entry));
    }
    let entry = pool.acquire();
    check!(*entry == 123, "wrong entry value");
    check!(entries_cnt.get() == 1, "pool should contain one entry");
    pool.release(entry);
    rt.shutdown();
    Ok(())
}

fn pool_all() -> TestResult {
    pool_create_delete()?;
    pool_basic()?;
    pool_fiberpool()?;
    Ok(())
}

////////////////////////////////////////////////////////////////////////////////
// rpc
////////////////////////////////////////////////////////////////////////////////

struct EchoService {
    calls: Cell<u32>,
}

/// `bar(u32 a, i64 b, blob c) -> (i32 d)` with `d = a + b + len(c)`, plus an
/// empty `baz`.
fn echo_interface() -> Interface<EchoService> {
    Interface::new(vec![
        Method::new(
            vec![
                Param::key(WireType::U32),
                Param::new(WireType::I64),
                Param::key(WireType::Blob),
            ],
            vec![Param::new(WireType::I32)],
            |data, service: &EchoService| {
                service.calls.set(service.calls.get() + 1);
                let a = data.request_param(0).as_u32();
                let b = data.request_param(1).as_i64();
                let c = data.request_param(2).as_blob();
                let d = a as i32 + b as i32 + c.len() as i32;
                data.set_response_param(0, Value::I32(d));
            },
        ),
        Method::new(vec![], vec![], |_, _| {}),
    ])
}

fn rpc_echo() -> TestResult {
    let rt = Runtime::new();
    let interface = Rc::new(echo_interface());
    let service = Rc::new(EchoService {
        calls: Cell::new(0),
    });
    let server = Server::new(ServerParams {
        interface: Rc::clone(&interface),
        service_ctx: Rc::clone(&service),
        listen_addr: "127.0.0.1:0".parse().unwrap(),
    })
    .map_err(|e| format!("rpc_echo: ASSERT(Server::new(params)) failed: {}", e))?;
    let addr = server
        .listen_addr()
        .map_err(|e| format!("rpc_echo: ASSERT(server.listen_addr()) failed: {}", e))?;

    let mut client = Client::connect(&addr, Rc::clone(&interface))
        .map_err(|e| format!("rpc_echo: ASSERT(Client::connect(addr)) failed: {}", e))?;
    let response = client
        .call(
            0,
            vec![Value::U32(7), Value::I64(-3), Value::Blob(b"hi".to_vec())],
        )
        .map_err(|e| format!("rpc_echo: ASSERT(client.call(0)) failed: {}", e))?;
    check!(response == vec![Value::I32(6)], "d should be 7 - 3 + 2 = 6");
    check!(service.calls.get() == 1, "the callback should run once");

    let response = client
        .call(1, vec![])
        .map_err(|e| format!("rpc_echo: ASSERT(client.call(1)) failed: {}", e))?;
    check!(response.is_empty(), "baz has no response params");

    server.shutdown();
    rt.shutdown();
    Ok(())
}

fn rpc_unknown_method() -> TestResult {
    let rt = Runtime::new();
    let interface = Rc::new(echo_interface());
    let server = Server::new(ServerParams {
        interface: Rc::clone(&interface),
        service_ctx: Rc::new(EchoService {
            calls: Cell::new(0),
        }),
        listen_addr: "127.0.0.1:0".parse().unwrap(),
    })
    .map_err(|e| format!("rpc_unknown_method: ASSERT(Server::new(params)) failed: {}", e))?;
    let addr = server.listen_addr().unwrap();

    let bad = fiberio::net::TcpStream::connect(&addr)
        .map_err(|e| format!("rpc_unknown_method: ASSERT(Client::connect(addr)) failed: {}", e))?;
    bad.send(&[99])
        .map_err(|e| format!("rpc_unknown_method: ASSERT(bad.send(method_id)) failed: {}", e))?;
    let mut buf = [0u8; 1];
    let n = bad.recv(&mut buf).unwrap_or(0);
    check!(n == 0, "an unknown method id should close the connection");

    let mut client = Client::connect(&addr, Rc::clone(&interface))
        .map_err(|e| format!("rpc_unknown_method: ASSERT(Client::connect(addr)) failed: {}", e))?;
    let response = client
        .call(
            0,
            vec![Value::U32(4), Value::I64(0), Value::Blob(b"xy".to_vec())],
        )
        .map_err(|e| format!("rpc_unknown_method: ASSERT(client.call(0)) failed: {}", e))?;
    check!(
        response == vec![Value::I32(6)],
        "the server should stay available after a bad connection"
    );

    server.shutdown();
    rt.shutdown();
    Ok(())
}

fn rpc_request_hash() -> TestResult {
    let rt = Runtime::new();
    let interface = echo_interface();

    let mut a = interface.create_data(0).unwrap();
    a.set_request_param(0, Value::U32(7));
    a.set_request_param(1, Value::I64(-3));
    a.set_request_param(2, Value::Blob(b"hi".to_vec()));

    let mut b = interface.create_data(0).unwrap();
    b.set_request_param(0, Value::U32(7));
    b.set_request_param(1, Value::I64(999_999));
    b.set_request_param(2, Value::Blob(b"hi".to_vec()));

    check!(
        a.request_hash(0) == b.request_hash(0),
        "the hash should depend only on is-key parameters"
    );
    check!(
        a.request_hash(0) == a.request_hash(0),
        "the hash should be deterministic"
    );
    check!(
        a.request_hash(0) != a.request_hash(1),
        "the hash should depend on the start value"
    );

    b.set_request_param(0, Value::U32(8));
    check!(
        a.request_hash(0) != b.request_hash(0),
        "the hash should depend on key parameter values"
    );

    rt.shutdown();
    Ok(())
}

fn rpc_all() -> TestResult {
    rpc_echo()?;
    rpc_unknown_method()?;
    rpc_request_hash()?;
    Ok(())
}
